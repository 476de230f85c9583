//! EC2 client capability.

use std::collections::HashMap;

use fleetgrid_state::{EC2InstanceConfig, EC2InstanceData, EC2InstanceType, InstanceId};

use crate::error::CloudResult;

/// The slice of the EC2 API the autoscaler needs.
#[allow(async_fn_in_trait)]
pub trait Ec2Client: Send + Sync {
    /// Launch between `min_count` and `max_count` machines of the
    /// configured type. Partial fulfillment (e.g. a quota limit) is
    /// explicit and acceptable: the returned list may be shorter than
    /// `max_count` but never shorter than `min_count`.
    async fn launch_instances(
        &self,
        config: &EC2InstanceConfig,
        min_count: u32,
        max_count: u32,
    ) -> CloudResult<Vec<EC2InstanceData>>;

    async fn terminate_instances(&self, ids: &[InstanceId]) -> CloudResult<()>;

    /// All machines of this pool currently running.
    async fn describe_instances(&self) -> CloudResult<Vec<EC2InstanceData>>;

    /// Resolve catalog names to their cpu/ram capabilities. Unknown
    /// names are silently dropped from the result.
    async fn instance_type_capabilities(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<EC2InstanceType>>;

    /// Merge tags onto a running machine.
    async fn set_instance_tags(
        &self,
        id: &InstanceId,
        tags: HashMap<String, String>,
    ) -> CloudResult<()>;
}
