//! Demand estimation strategies.
//!
//! The pool serves exactly one kind of workload, chosen at startup:
//! dynamic Swarm services or computational Dask tasks. Both reduce to
//! the same question: which resource vectors are waiting for a
//! machine?

use std::sync::Arc;

use tracing::debug;

use fleetgrid_cloud::{CloudResult, DaskClient, SwarmClient};
use fleetgrid_placement::{resources_from_dask_task, resources_from_service_spec};
use fleetgrid_state::{Resources, Settings};

/// One capability: enumerate the resource requirements of workload
/// items that have no machine yet.
#[allow(async_fn_in_trait)]
pub trait DemandSource: Send + Sync {
    async fn estimate_pending_demand(&self) -> CloudResult<Vec<Resources>>;
}

/// Dynamic mode: Swarm services the orchestrator could not place.
pub struct DynamicDemand<S> {
    swarm: S,
}

impl<S: SwarmClient> DynamicDemand<S> {
    pub fn new(swarm: S) -> Self {
        Self { swarm }
    }
}

impl<S: SwarmClient> DemandSource for DynamicDemand<S> {
    async fn estimate_pending_demand(&self) -> CloudResult<Vec<Resources>> {
        let services = self.swarm.list_unscheduled_services().await?;
        let demand: Vec<Resources> = services
            .iter()
            .map(resources_from_service_spec)
            .collect();
        debug!(items = demand.len(), "dynamic demand estimated");
        Ok(demand)
    }
}

/// Computational mode: queued or processing Dask tasks.
pub struct ComputationalDemand<D> {
    dask: D,
    settings: Arc<Settings>,
}

impl<D: DaskClient> ComputationalDemand<D> {
    pub fn new(dask: D, settings: Arc<Settings>) -> Self {
        Self { dask, settings }
    }
}

impl<D: DaskClient> DemandSource for ComputationalDemand<D> {
    async fn estimate_pending_demand(&self) -> CloudResult<Vec<Resources>> {
        let tasks = self.dask.list_pending_tasks().await?;
        let demand: Vec<Resources> = tasks
            .iter()
            .map(|task| resources_from_dask_task(&task.required_resources, &self.settings))
            .collect();
        debug!(items = demand.len(), "computational demand estimated");
        Ok(demand)
    }
}
