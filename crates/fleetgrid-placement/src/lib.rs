//! Sizing logic: normalize workload requirements into `Resources` and
//! bin-pack them onto the smallest satisfying instance type.

mod normalizer;
mod selector;

pub use normalizer::{
    resources_from_dask_task, resources_from_service_spec, DASK_WORKER_THREAD_RESOURCE,
};
pub use selector::{closest_instance_policy, find_best_fitting, FitPolicy};
