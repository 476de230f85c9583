//! Machine-scoped label storage.
//!
//! There is no central database: lifecycle state lives in EC2 tags or
//! Swarm node labels. Both backends sit behind one `LabelStore` trait
//! keyed by instance id, so the decision logic never knows which one
//! it is reading.

use std::collections::HashMap;

use fleetgrid_state::{InstanceId, INSTANCE_ID_LABEL};

use crate::ec2::Ec2Client;
use crate::error::{CloudError, CloudResult};
use crate::swarm::SwarmClient;

/// Typed get/set/list over the key/value pairs attached to a machine.
#[allow(async_fn_in_trait)]
pub trait LabelStore: Send + Sync {
    async fn get(&self, machine: &InstanceId, key: &str) -> CloudResult<Option<String>>;

    async fn set(&self, machine: &InstanceId, key: &str, value: &str) -> CloudResult<()>;

    async fn remove(&self, machine: &InstanceId, key: &str) -> CloudResult<()>;

    async fn list(&self, machine: &InstanceId) -> CloudResult<HashMap<String, String>>;
}

// ── EC2 tag backend ───────────────────────────────────────────────

/// Labels stored as EC2 instance tags.
#[derive(Debug, Clone)]
pub struct Ec2TagStore<E> {
    ec2: E,
}

impl<E: Ec2Client> Ec2TagStore<E> {
    pub fn new(ec2: E) -> Self {
        Self { ec2 }
    }

    async fn tags_of(&self, machine: &InstanceId) -> CloudResult<HashMap<String, String>> {
        let instances = self.ec2.describe_instances().await?;
        instances
            .into_iter()
            .find(|i| &i.id == machine)
            .map(|i| i.tags)
            .ok_or_else(|| CloudError::InstanceNotFound(machine.clone()))
    }
}

impl<E: Ec2Client> LabelStore for Ec2TagStore<E> {
    async fn get(&self, machine: &InstanceId, key: &str) -> CloudResult<Option<String>> {
        Ok(self.tags_of(machine).await?.remove(key))
    }

    async fn set(&self, machine: &InstanceId, key: &str, value: &str) -> CloudResult<()> {
        self.ec2
            .set_instance_tags(machine, HashMap::from([(key.to_string(), value.to_string())]))
            .await
    }

    async fn remove(&self, machine: &InstanceId, key: &str) -> CloudResult<()> {
        let mut tags = self.tags_of(machine).await?;
        tags.remove(key);
        self.ec2.set_instance_tags(machine, tags).await
    }

    async fn list(&self, machine: &InstanceId) -> CloudResult<HashMap<String, String>> {
        self.tags_of(machine).await
    }
}

// ── Swarm label backend ───────────────────────────────────────────

/// Labels stored on the Swarm node a machine joined as. The node is
/// resolved through its `instance-id` label on every call; nothing is
/// cached across calls.
#[derive(Debug, Clone)]
pub struct SwarmLabelStore<S> {
    swarm: S,
}

impl<S: SwarmClient> SwarmLabelStore<S> {
    pub fn new(swarm: S) -> Self {
        Self { swarm }
    }

    async fn node_id_for(&self, machine: &InstanceId) -> CloudResult<String> {
        let nodes = self.swarm.list_nodes().await?;
        nodes
            .into_iter()
            .find(|n| n.labels.get(INSTANCE_ID_LABEL) == Some(machine))
            .map(|n| n.id)
            .ok_or_else(|| CloudError::NodeNotFound(machine.clone()))
    }
}

impl<S: SwarmClient> LabelStore for SwarmLabelStore<S> {
    async fn get(&self, machine: &InstanceId, key: &str) -> CloudResult<Option<String>> {
        let node_id = self.node_id_for(machine).await?;
        self.swarm.read_label(&node_id, key).await
    }

    async fn set(&self, machine: &InstanceId, key: &str, value: &str) -> CloudResult<()> {
        let node_id = self.node_id_for(machine).await?;
        self.swarm.write_label(&node_id, key, value).await
    }

    async fn remove(&self, machine: &InstanceId, key: &str) -> CloudResult<()> {
        let node_id = self.node_id_for(machine).await?;
        self.swarm.remove_label(&node_id, key).await
    }

    async fn list(&self, machine: &InstanceId) -> CloudResult<HashMap<String, String>> {
        let node_id = self.node_id_for(machine).await?;
        let nodes = self.swarm.list_nodes().await?;
        nodes
            .into_iter()
            .find(|n| n.id == node_id)
            .map(|n| n.labels)
            .ok_or(CloudError::NodeNotFound(machine.clone()))
    }
}
