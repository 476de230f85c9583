//! Error types for the external capability layer.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Failures surfaced by the external collaborators. Transient retry
/// and backoff happen inside the adapters; by the time an error
/// reaches the control loop the tick simply logs it and re-derives
/// everything fresh on the next tick.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("EC2 API error: {0}")]
    Ec2Api(String),

    #[error("Swarm API error: {0}")]
    SwarmApi(String),

    #[error("Dask scheduler error: {0}")]
    DaskApi(String),

    #[error("no Swarm node is labeled for instance {0}")]
    NodeNotFound(String),

    #[error("unknown EC2 instance {0}")]
    InstanceNotFound(String),
}
