//! Docker Swarm client capability.

use fleetgrid_state::{NodeId, ServiceResourceSpec, SwarmNode};

use crate::error::CloudResult;

/// The slice of the Swarm API the autoscaler needs: node listing,
/// label reads/writes, and the dynamic-mode demand signal.
#[allow(async_fn_in_trait)]
pub trait SwarmClient: Send + Sync {
    async fn list_nodes(&self) -> CloudResult<Vec<SwarmNode>>;

    async fn read_label(&self, node_id: &NodeId, key: &str) -> CloudResult<Option<String>>;

    async fn write_label(&self, node_id: &NodeId, key: &str, value: &str) -> CloudResult<()>;

    async fn remove_label(&self, node_id: &NodeId, key: &str) -> CloudResult<()>;

    /// Services the orchestrator could not place yet for lack of
    /// resources.
    async fn list_unscheduled_services(&self) -> CloudResult<Vec<ServiceResourceSpec>>;

    /// Remove a node that left or was terminated.
    async fn remove_node(&self, node_id: &NodeId) -> CloudResult<()>;
}
