//! Dask scheduler client capability.

use fleetgrid_state::DaskTask;

use crate::error::CloudResult;

/// The slice of the Dask scheduler RPC the autoscaler needs: the
/// computational-mode demand signal.
#[allow(async_fn_in_trait)]
pub trait DaskClient: Send + Sync {
    /// Tasks queued or processing without an assigned worker.
    async fn list_pending_tasks(&self) -> CloudResult<Vec<DaskTask>>;
}
