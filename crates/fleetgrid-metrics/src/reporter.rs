//! Gauge and counter tracking with stale-label hygiene.
//!
//! A gauge label that once reported a nonzero value and then vanishes
//! from a snapshot must be re-emitted as an explicit `0`, otherwise
//! the metrics backend keeps showing the last nonzero sample forever.
//! That is why gauges remember every label they ever saw, in
//! first-seen order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use fleetgrid_state::{AssociatedInstance, Cluster, EC2InstanceData};

/// A gauge family keyed by one label (the instance-type name).
#[derive(Debug, Default, Clone)]
pub struct TrackedGauge {
    /// Every label ever observed, in first-seen order.
    order: Vec<String>,
    values: HashMap<String, u64>,
}

impl TrackedGauge {
    /// Replace the gauge values with `counts`. Labels seen in earlier
    /// updates but absent from `counts` are set to zero, not dropped.
    pub fn update<'a>(&mut self, counts: impl IntoIterator<Item = (&'a str, u64)>) {
        for value in self.values.values_mut() {
            *value = 0;
        }
        for (label, count) in counts {
            if !self.values.contains_key(label) {
                self.order.push(label.to_string());
            }
            self.values.insert(label.to_string(), count);
        }
    }

    /// Samples in first-seen-label order, zeros included.
    pub fn samples(&self) -> Vec<(String, u64)> {
        self.order
            .iter()
            .map(|label| (label.clone(), self.values.get(label).copied().unwrap_or(0)))
            .collect()
    }
}

/// A monotonic counter family keyed by one label.
#[derive(Debug, Default, Clone)]
struct TrackedCounter {
    order: Vec<String>,
    values: HashMap<String, u64>,
}

impl TrackedCounter {
    fn add(&mut self, label: &str, amount: u64) {
        if !self.values.contains_key(label) {
            self.order.push(label.to_string());
        }
        *self.values.entry(label.to_string()).or_insert(0) += amount;
    }

    fn samples(&self) -> Vec<(String, u64)> {
        self.order
            .iter()
            .map(|label| (label.clone(), self.values[label]))
            .collect()
    }
}

/// The lifecycle buckets exported as gauge families, in exposition
/// order.
pub(crate) const BUCKETS: [&str; 6] = [
    "pending",
    "broken",
    "ready",
    "draining",
    "pending_termination",
    "terminated",
];

#[derive(Debug, Default)]
struct ReporterInner {
    /// One tracked gauge per lifecycle bucket, ordered as [`BUCKETS`].
    gauges: Vec<TrackedGauge>,
    launched: TrackedCounter,
}

/// Observes every cluster snapshot. Clones share the same registry.
#[derive(Debug, Clone)]
pub struct FleetReporter {
    inner: Arc<Mutex<ReporterInner>>,
}

impl Default for FleetReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetReporter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReporterInner {
                gauges: vec![TrackedGauge::default(); BUCKETS.len()],
                launched: TrackedCounter::default(),
            })),
        }
    }

    /// Ingest one snapshot: refresh every bucket gauge.
    pub fn observe(&self, cluster: &Cluster) {
        let mut inner = self.inner.lock().unwrap();
        inner.gauges[0].update(count_instances(&cluster.pending_instances));
        inner.gauges[1].update(count_instances(&cluster.broken_instances));
        inner.gauges[2].update(count_associated(&cluster.ready_nodes));
        inner.gauges[3].update(count_associated(&cluster.draining_nodes));
        inner.gauges[4].update(count_associated(&cluster.pending_termination_nodes));
        inner.gauges[5].update(count_instances(&cluster.terminated_instances));
        debug!(machines = cluster.total_number_of_machines(), "snapshot observed");
    }

    /// Count machines launched, per instance type.
    pub fn record_launched(&self, instance_type: &str, count: u64) {
        self.inner.lock().unwrap().launched.add(instance_type, count);
    }

    /// Samples of one bucket gauge, first-seen order.
    pub fn gauge_samples(&self, bucket: &str) -> Vec<(String, u64)> {
        let inner = self.inner.lock().unwrap();
        BUCKETS
            .iter()
            .position(|b| *b == bucket)
            .map(|i| inner.gauges[i].samples())
            .unwrap_or_default()
    }

    /// Samples of the launch counter, first-seen order.
    pub fn launched_samples(&self) -> Vec<(String, u64)> {
        self.inner.lock().unwrap().launched.samples()
    }

    /// All bucket gauges with their names, in exposition order.
    pub fn all_gauge_samples(&self) -> Vec<(&'static str, Vec<(String, u64)>)> {
        let inner = self.inner.lock().unwrap();
        BUCKETS
            .iter()
            .zip(&inner.gauges)
            .map(|(name, gauge)| (*name, gauge.samples()))
            .collect()
    }
}

/// Per-instance-type counts of a bucket, preserving first-occurrence
/// order within the snapshot.
fn count_instances(instances: &[EC2InstanceData]) -> Vec<(&str, u64)> {
    ordered_counts(instances.iter().map(|i| i.instance_type.as_str()))
}

fn count_associated(nodes: &[AssociatedInstance]) -> Vec<(&str, u64)> {
    ordered_counts(nodes.iter().map(|n| n.ec2_instance.instance_type.as_str()))
}

fn ordered_counts<'a>(types: impl Iterator<Item = &'a str>) -> Vec<(&'a str, u64)> {
    let mut counts: Vec<(&str, u64)> = Vec::new();
    for name in types {
        match counts.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    counts
}
