//! Workload requirement normalization.
//!
//! Converts the two workload flavors (Dask task resource maps, Swarm
//! service resource specs) into the uniform `Resources` vector the
//! selector works with. There are no error conditions here: unknown
//! resource names are preserved, not rejected.

use std::collections::HashMap;

use fleetgrid_state::{Resources, ServiceResourceSpec, Settings};

/// Every Dask task claims one logical worker thread, whether or not
/// its resource map mentions it.
pub const DASK_WORKER_THREAD_RESOURCE: &str = "dask-worker-thread";

const NANO_CPU: f64 = 1e9;

/// Normalize a Dask task's declared `required_resources`.
///
/// `CPU` and `RAM` map to the cpu/ram fields, falling back to the
/// configured defaults when absent; every other key is copied verbatim
/// into the generic resources.
pub fn resources_from_dask_task(
    required_resources: &HashMap<String, f64>,
    settings: &Settings,
) -> Resources {
    let mut generic_resources: HashMap<String, f64> = required_resources
        .iter()
        .filter(|(name, _)| name.as_str() != "CPU" && name.as_str() != "RAM")
        .map(|(name, amount)| (name.clone(), *amount))
        .collect();
    generic_resources.insert(DASK_WORKER_THREAD_RESOURCE.to_string(), 1.0);

    Resources {
        cpus: required_resources
            .get("CPU")
            .copied()
            .unwrap_or(settings.dask_default_max_cpu),
        ram: required_resources
            .get("RAM")
            .map(|ram| *ram as u64)
            .unwrap_or(settings.dask_default_max_ram),
        generic_resources,
    }
}

/// Normalize a Swarm service resource spec: the highest of reservation
/// and limit per dimension. A spec with neither yields the empty
/// requirement, which the selector then rejects for that one item.
pub fn resources_from_service_spec(spec: &ServiceResourceSpec) -> Resources {
    let nano_cpus = spec
        .reservations
        .map(|r| r.nano_cpus)
        .unwrap_or(0)
        .max(spec.limits.map(|l| l.nano_cpus).unwrap_or(0));
    let ram = spec
        .reservations
        .map(|r| r.memory_bytes)
        .unwrap_or(0)
        .max(spec.limits.map(|l| l.memory_bytes).unwrap_or(0));

    Resources::new(nano_cpus as f64 / NANO_CPU, ram)
}
