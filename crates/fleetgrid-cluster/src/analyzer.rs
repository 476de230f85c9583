//! Cluster snapshot analysis.
//!
//! Buckets every running machine into exactly one lifecycle state,
//! derived from label truth at snapshot time. No writes happen here;
//! the output is a pure value.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use fleetgrid_state::{
    node_is_service_ready, node_termination_started_at, AssociatedInstance, Clock, Cluster,
    EC2InstanceData, SwarmNode, INSTANCE_ID_LABEL,
};

/// Builds the per-tick `Cluster` snapshot.
pub struct ClusterAnalyzer<C> {
    clock: C,
    /// Booting longer than this counts as broken.
    max_start_time: Duration,
}

impl<C: Clock> ClusterAnalyzer<C> {
    pub fn new(clock: C, max_start_time: Duration) -> Self {
        Self {
            clock,
            max_start_time,
        }
    }

    /// Partition `ec2_instances` into lifecycle buckets.
    ///
    /// An instance is associated with the Swarm node whose
    /// `instance-id` label names it. Instances with no such node are
    /// still booting (or broken, past the join timeout). Association
    /// must be bijective: a label pointing at an already-claimed
    /// instance is ignored with a warning.
    pub fn analyze(
        &self,
        ec2_instances: Vec<EC2InstanceData>,
        swarm_nodes: &[SwarmNode],
    ) -> Cluster {
        let now = self.clock.epoch_secs();

        let mut nodes_by_instance: HashMap<&str, &SwarmNode> = HashMap::new();
        for node in swarm_nodes {
            let Some(instance_id) = node.labels.get(INSTANCE_ID_LABEL) else {
                continue;
            };
            if let Some(claimed) = nodes_by_instance.insert(instance_id, node) {
                warn!(
                    instance_id = %instance_id,
                    node = %node.id,
                    already_claimed_by = %claimed.id,
                    "two nodes claim the same instance, keeping the later one"
                );
            }
        }

        let mut cluster = Cluster::default();
        for instance in ec2_instances {
            match nodes_by_instance.remove(instance.id.as_str()) {
                Some(node) => {
                    let associated = AssociatedInstance {
                        node: node.clone(),
                        ec2_instance: instance,
                    };
                    if node_termination_started_at(node).is_some() {
                        cluster.pending_termination_nodes.push(associated);
                    } else if node_is_service_ready(node) {
                        cluster.ready_nodes.push(associated);
                    } else {
                        cluster.draining_nodes.push(associated);
                    }
                }
                None => {
                    let booting_for = now.saturating_sub(instance.launched_at);
                    if booting_for > self.max_start_time.as_secs() {
                        warn!(
                            id = %instance.id,
                            booting_for_secs = booting_for,
                            "instance never joined the cluster, flagging as broken"
                        );
                        cluster.broken_instances.push(instance);
                    } else {
                        cluster.pending_instances.push(instance);
                    }
                }
            }
        }

        debug!(
            pending = cluster.pending_instances.len(),
            broken = cluster.broken_instances.len(),
            ready = cluster.ready_nodes.len(),
            draining = cluster.draining_nodes.len(),
            pending_termination = cluster.pending_termination_nodes.len(),
            "cluster snapshot"
        );
        cluster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::{
        ManualClock, SERVICE_READY_LABEL, SERVICE_READY_SINCE_LABEL,
        TERMINATION_STARTED_AT_LABEL,
    };

    const MAX_START: Duration = Duration::from_secs(180);

    fn instance(id: &str, launched_at: u64) -> EC2InstanceData {
        EC2InstanceData {
            id: id.to_string(),
            instance_type: "t2.micro".to_string(),
            launched_at,
            tags: HashMap::new(),
        }
    }

    fn node(id: &str, instance_id: &str, labels: &[(&str, &str)]) -> SwarmNode {
        let mut all: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        all.insert(INSTANCE_ID_LABEL.to_string(), instance_id.to_string());
        SwarmNode {
            id: id.to_string(),
            hostname: format!("host-{id}"),
            labels: all,
        }
    }

    fn analyzer(now: u64) -> ClusterAnalyzer<ManualClock> {
        ClusterAnalyzer::new(ManualClock::new(now), MAX_START)
    }

    #[test]
    fn unassociated_instance_is_booting() {
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 950)], &[]);
        assert_eq!(cluster.pending_instances.len(), 1);
        assert_eq!(cluster.total_number_of_machines(), 1);
    }

    #[test]
    fn unassociated_instance_past_join_timeout_is_broken() {
        let cluster = analyzer(10_000).analyze(vec![instance("i-1", 100)], &[]);
        assert!(cluster.pending_instances.is_empty());
        assert_eq!(cluster.broken_instances.len(), 1);
    }

    #[test]
    fn ready_label_buckets_as_ready() {
        let nodes = vec![node(
            "n-1",
            "i-1",
            &[(SERVICE_READY_LABEL, "true"), (SERVICE_READY_SINCE_LABEL, "990")],
        )];
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 900)], &nodes);
        assert_eq!(cluster.ready_nodes.len(), 1);
        assert_eq!(cluster.ready_nodes[0].ec2_instance.id, "i-1");
        assert_eq!(cluster.ready_nodes[0].node.id, "n-1");
    }

    #[test]
    fn unready_label_buckets_as_draining() {
        let nodes = vec![node("n-1", "i-1", &[(SERVICE_READY_LABEL, "false")])];
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 900)], &nodes);
        assert_eq!(cluster.draining_nodes.len(), 1);
    }

    #[test]
    fn termination_label_wins_over_readiness() {
        let nodes = vec![node(
            "n-1",
            "i-1",
            &[
                (SERVICE_READY_LABEL, "true"),
                (TERMINATION_STARTED_AT_LABEL, "995"),
            ],
        )];
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 900)], &nodes);
        assert!(cluster.ready_nodes.is_empty());
        assert_eq!(cluster.pending_termination_nodes.len(), 1);
    }

    #[test]
    fn malformed_ready_label_reads_as_draining() {
        let nodes = vec![node("n-1", "i-1", &[(SERVICE_READY_LABEL, "maybe")])];
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 900)], &nodes);
        assert_eq!(cluster.draining_nodes.len(), 1);
    }

    #[test]
    fn malformed_termination_label_does_not_crash_the_tick() {
        let nodes = vec![node(
            "n-1",
            "i-1",
            &[
                (SERVICE_READY_LABEL, "true"),
                (TERMINATION_STARTED_AT_LABEL, "not-a-timestamp"),
            ],
        )];
        let cluster = analyzer(1000).analyze(vec![instance("i-1", 900)], &nodes);
        // unparsable termination timestamp reads as absent
        assert_eq!(cluster.ready_nodes.len(), 1);
    }

    #[test]
    fn every_instance_lands_in_exactly_one_bucket() {
        let nodes = vec![
            node("n-1", "i-ready", &[(SERVICE_READY_LABEL, "true")]),
            node("n-2", "i-drain", &[(SERVICE_READY_LABEL, "false")]),
            node("n-3", "i-term", &[(TERMINATION_STARTED_AT_LABEL, "990")]),
        ];
        let instances = vec![
            instance("i-ready", 900),
            instance("i-drain", 900),
            instance("i-term", 900),
            instance("i-boot", 990),
            instance("i-broken", 1),
        ];
        let cluster = analyzer(1000).analyze(instances, &nodes);

        assert_eq!(cluster.ready_nodes.len(), 1);
        assert_eq!(cluster.draining_nodes.len(), 1);
        assert_eq!(cluster.pending_termination_nodes.len(), 1);
        assert_eq!(cluster.pending_instances.len(), 1);
        assert_eq!(cluster.broken_instances.len(), 1);
        assert_eq!(cluster.total_number_of_machines(), 5);
    }

    #[test]
    fn node_without_matching_instance_is_ignored() {
        let nodes = vec![node("n-1", "i-gone", &[(SERVICE_READY_LABEL, "true")])];
        let cluster = analyzer(1000).analyze(vec![], &nodes);
        assert_eq!(cluster.total_number_of_machines(), 0);
    }
}
