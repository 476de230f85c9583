//! Error taxonomy for the autoscaler.

use thiserror::Error;

/// Result type alias for scaling decisions and configuration.
pub type ScalingResult<T> = Result<T, ScalingError>;

#[derive(Debug, Error)]
pub enum ScalingError {
    /// The service cannot operate at all with this configuration.
    /// Aborts startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No instance type in the allowed catalog satisfies one workload
    /// item. The item is skipped this tick and retried on the next.
    #[error("no allowed EC2 instance type satisfies cpus={cpus} ram={ram} bytes")]
    Ec2InstanceNotFound { cpus: f64, ram: u64 },

    /// The pool is at its configured maximum size.
    #[error("cannot launch more EC2 instances, the maximum of {limit} is reached")]
    Ec2TooManyInstances { limit: u32 },

    /// A pre-pull image name failed the image-name grammar. Aborts
    /// startup.
    #[error("invalid container image name: {0:?}")]
    InvalidImageName(String),

    /// An environment setting failed to parse. Aborts startup.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}
