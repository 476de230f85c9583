//! Domain types for the fleetgrid autoscaler.
//!
//! These types describe resource requirements, the EC2 machine catalog,
//! running machines, their orchestrator-side nodes, and the per-tick
//! cluster snapshot. Snapshots are values: built fresh every control
//! loop tick and never mutated in place.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier of an EC2 instance (e.g. `i-0abc123`).
pub type InstanceId = String;

/// Unique identifier of a Swarm node.
pub type NodeId = String;

// ── Resources ─────────────────────────────────────────────────────

/// A resource vector: either a requirement of one workload item or the
/// capacity of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU cores (fractional allowed).
    pub cpus: f64,
    /// RAM in bytes.
    pub ram: u64,
    /// Named capacities beyond cpu/ram (GPU count, worker threads, ...).
    pub generic_resources: HashMap<String, f64>,
}

impl Resources {
    pub fn new(cpus: f64, ram: u64) -> Self {
        Self {
            cpus,
            ram,
            generic_resources: HashMap::new(),
        }
    }

    /// The empty requirement. Deliberately unsatisfiable by the
    /// instance selector: no machine "matches" a null request.
    pub fn none() -> Self {
        Self::new(0.0, 0)
    }

    pub fn with_generic(mut self, name: &str, amount: f64) -> Self {
        self.generic_resources.insert(name.to_string(), amount);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cpus == 0.0 && self.ram == 0
    }

    /// Field-wise sum, merging generic resources by key.
    pub fn accumulated_with(&self, other: &Resources) -> Resources {
        let mut generic_resources = self.generic_resources.clone();
        for (name, amount) in &other.generic_resources {
            *generic_resources.entry(name.clone()).or_insert(0.0) += amount;
        }
        Resources {
            cpus: self.cpus + other.cpus,
            ram: self.ram + other.ram,
            generic_resources,
        }
    }

    /// Whether this requirement fits inside `capacity`. A generic
    /// resource missing from the capacity counts as zero.
    pub fn fits_within(&self, capacity: &Resources) -> bool {
        self.cpus <= capacity.cpus
            && self.ram <= capacity.ram
            && self.generic_resources.iter().all(|(name, amount)| {
                *amount <= capacity.generic_resources.get(name).copied().unwrap_or(0.0)
            })
    }
}

// ── EC2 machine catalog and launch config ─────────────────────────

/// One purchasable machine size from the instance catalog.
/// Sourced from the EC2 collaborator; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EC2InstanceType {
    pub name: String,
    pub cpus: f64,
    pub ram: u64,
}

impl EC2InstanceType {
    /// The machine's capacity as a resource vector.
    pub fn as_resources(&self) -> Resources {
        Resources::new(self.cpus, self.ram)
    }
}

/// Everything needed to launch machines of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EC2InstanceConfig {
    pub instance_type: EC2InstanceType,
    pub tags: HashMap<String, String>,
    pub startup_script: String,
    pub ami_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub iam_instance_profile: String,
}

/// A running machine as reported by the EC2 collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EC2InstanceData {
    pub id: InstanceId,
    /// Instance-type name (catalog key).
    pub instance_type: String,
    /// Launch time, epoch seconds.
    pub launched_at: u64,
    pub tags: HashMap<String, String>,
}

// ── Orchestrator side ─────────────────────────────────────────────

/// A Swarm cluster member, as listed by the Swarm collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmNode {
    pub id: NodeId,
    pub hostname: String,
    pub labels: HashMap<String, String>,
}

/// A running machine paired with the Swarm node it joined as.
/// Recomputed on every tick; has no lifecycle of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedInstance {
    pub node: SwarmNode,
    pub ec2_instance: EC2InstanceData,
}

// ── Cluster snapshot ──────────────────────────────────────────────

/// One tick's view of the machine pool, partitioned into disjoint
/// lifecycle buckets. State is derived from label/tag truth at snapshot
/// time, never stored or advanced independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// EC2 running, not yet visible as a labeled Swarm node.
    pub pending_instances: Vec<EC2InstanceData>,
    /// Booting for longer than the configured join timeout.
    pub broken_instances: Vec<EC2InstanceData>,
    /// Joined and `service-ready=true`.
    pub ready_nodes: Vec<AssociatedInstance>,
    /// Joined, `service-ready=false`, termination not started.
    pub draining_nodes: Vec<AssociatedInstance>,
    /// Termination started (`termination-started-at` set).
    pub pending_termination_nodes: Vec<AssociatedInstance>,
    /// Terminated this tick; kept for instrumentation only.
    pub terminated_instances: Vec<EC2InstanceData>,
}

impl Cluster {
    /// Machines that currently exist, summed across the lifecycle
    /// buckets. Terminated machines are gone from both systems and do
    /// not count.
    pub fn total_number_of_machines(&self) -> usize {
        self.pending_instances.len()
            + self.broken_instances.len()
            + self.ready_nodes.len()
            + self.draining_nodes.len()
            + self.pending_termination_nodes.len()
    }

    /// Nodes that may still hold or accept work.
    pub fn active_nodes(&self) -> impl Iterator<Item = &AssociatedInstance> {
        self.ready_nodes.iter().chain(self.draining_nodes.iter())
    }
}
