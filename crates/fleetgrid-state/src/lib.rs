//! Shared domain types for the fleetgrid autoscaler.
//!
//! Everything that more than one subsystem needs lives here: the
//! resource and machine types, the cluster snapshot with its lifecycle
//! buckets, the node label vocabulary, the immutable settings struct,
//! the clock abstraction, and the error taxonomy.

mod clock;
mod config;
mod error;
mod labels;
mod types;
mod workload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    parse_duration_setting, parse_signed_duration, termination_grace_period, ScalingMode,
    Settings, SignedDuration,
};
pub use error::{ScalingError, ScalingResult};
pub use labels::{
    node_is_service_ready, node_ready_since, node_termination_started_at,
    INSTANCE_ID_LABEL, SERVICE_READY_LABEL, SERVICE_READY_SINCE_LABEL,
    TERMINATION_STARTED_AT_LABEL,
};
pub use types::{
    AssociatedInstance, Cluster, EC2InstanceConfig, EC2InstanceData, EC2InstanceType,
    InstanceId, NodeId, Resources, SwarmNode,
};
pub use workload::{DaskTask, ServiceResourceSpec, ServiceResources};
