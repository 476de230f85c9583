//! Workload items as reported by the demand-side collaborators.
//!
//! These are the inputs of the resource normalizer: a Dask task with
//! its declared resource map, or a Swarm service resource spec.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A queued or processing Dask task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaskTask {
    pub task_id: String,
    /// Declared requirements, e.g. `{"CPU": 2.5, "RAM": 2e9, "GPU": 1}`.
    /// Keys beyond CPU/RAM are opaque generic resources.
    pub required_resources: HashMap<String, f64>,
}

/// Cpu/ram figures from one side of a Swarm resource spec.
/// CPUs are in nano-CPU units, as the Swarm API reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResources {
    pub nano_cpus: u64,
    pub memory_bytes: u64,
}

/// Resource spec of a Swarm service that could not be placed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResourceSpec {
    pub service_id: String,
    pub reservations: Option<ServiceResources>,
    pub limits: Option<ServiceResources>,
}
