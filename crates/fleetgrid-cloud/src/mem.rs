//! In-memory backends for the capability traits.
//!
//! These back the standalone daemon and the test suites. All clones of
//! a backend share the same state; launch times come from the injected
//! clock, not the wall clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use fleetgrid_state::{
    Clock, DaskTask, EC2InstanceConfig, EC2InstanceData, EC2InstanceType, InstanceId, NodeId,
    ServiceResourceSpec, SwarmNode, INSTANCE_ID_LABEL,
};

use crate::dask::DaskClient;
use crate::ec2::Ec2Client;
use crate::error::{CloudError, CloudResult};
use crate::swarm::SwarmClient;

// ── EC2 ───────────────────────────────────────────────────────────

struct Ec2State {
    instances: HashMap<InstanceId, EC2InstanceData>,
    terminated: Vec<InstanceId>,
    launch_counter: u64,
    /// Machines the "region" can still grant. `None` = unlimited.
    capacity: Option<u32>,
}

/// An EC2 region in a box.
#[derive(Clone)]
pub struct InMemoryEc2 {
    state: Arc<Mutex<Ec2State>>,
    catalog: Arc<Vec<EC2InstanceType>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEc2 {
    pub fn new(clock: impl Clock, catalog: Vec<EC2InstanceType>) -> Self {
        Self {
            state: Arc::new(Mutex::new(Ec2State {
                instances: HashMap::new(),
                terminated: Vec::new(),
                launch_counter: 0,
                capacity: None,
            })),
            catalog: Arc::new(catalog),
            clock: Arc::new(clock),
        }
    }

    /// Cap how many more machines launches may grant, to exercise
    /// partial fulfillment.
    pub fn with_capacity(self, remaining: u32) -> Self {
        self.state.lock().unwrap().capacity = Some(remaining);
        self
    }

    /// Ids terminated so far, in termination order.
    pub fn terminated_ids(&self) -> Vec<InstanceId> {
        self.state.lock().unwrap().terminated.clone()
    }
}

impl Ec2Client for InMemoryEc2 {
    async fn launch_instances(
        &self,
        config: &EC2InstanceConfig,
        min_count: u32,
        max_count: u32,
    ) -> CloudResult<Vec<EC2InstanceData>> {
        let mut state = self.state.lock().unwrap();

        let grantable = match state.capacity {
            Some(remaining) => remaining.min(max_count),
            None => max_count,
        };
        if grantable < min_count {
            return Err(CloudError::Ec2Api(format!(
                "InsufficientInstanceCapacity: requested at least {min_count}, only {grantable} available"
            )));
        }

        let now = self.clock.epoch_secs();
        let mut launched = Vec::with_capacity(grantable as usize);
        for _ in 0..grantable {
            state.launch_counter += 1;
            let instance = EC2InstanceData {
                id: format!("i-{:08x}", state.launch_counter),
                instance_type: config.instance_type.name.clone(),
                launched_at: now,
                tags: config.tags.clone(),
            };
            state.instances.insert(instance.id.clone(), instance.clone());
            launched.push(instance);
        }
        if let Some(remaining) = state.capacity.as_mut() {
            *remaining -= grantable;
        }

        info!(
            instance_type = %config.instance_type.name,
            count = launched.len(),
            "launched instances"
        );
        Ok(launched)
    }

    async fn terminate_instances(&self, ids: &[InstanceId]) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            if state.instances.remove(id).is_some() {
                state.terminated.push(id.clone());
                debug!(%id, "terminated instance");
            }
        }
        Ok(())
    }

    async fn describe_instances(&self) -> CloudResult<Vec<EC2InstanceData>> {
        let state = self.state.lock().unwrap();
        let mut instances: Vec<_> = state.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn instance_type_capabilities(
        &self,
        names: &[String],
    ) -> CloudResult<Vec<EC2InstanceType>> {
        Ok(self
            .catalog
            .iter()
            .filter(|t| names.contains(&t.name))
            .cloned()
            .collect())
    }

    async fn set_instance_tags(
        &self,
        id: &InstanceId,
        tags: HashMap<String, String>,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| CloudError::InstanceNotFound(id.clone()))?;
        instance.tags.extend(tags);
        Ok(())
    }
}

// ── Swarm ─────────────────────────────────────────────────────────

struct SwarmState {
    nodes: HashMap<NodeId, SwarmNode>,
    unscheduled: Vec<ServiceResourceSpec>,
    join_counter: u64,
}

/// A Swarm manager in a box.
#[derive(Clone)]
pub struct InMemorySwarm {
    state: Arc<Mutex<SwarmState>>,
}

impl Default for InMemorySwarm {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySwarm {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SwarmState {
                nodes: HashMap::new(),
                unscheduled: Vec::new(),
                join_counter: 0,
            })),
        }
    }

    /// Simulate a machine joining the swarm: creates a node carrying
    /// the `instance-id` association label. Returns the node id.
    pub fn join_node(&self, hostname: &str, instance_id: &str) -> NodeId {
        let mut state = self.state.lock().unwrap();
        state.join_counter += 1;
        let id = format!("node-{:04}", state.join_counter);
        state.nodes.insert(
            id.clone(),
            SwarmNode {
                id: id.clone(),
                hostname: hostname.to_string(),
                labels: HashMap::from([(
                    INSTANCE_ID_LABEL.to_string(),
                    instance_id.to_string(),
                )]),
            },
        );
        id
    }

    /// Queue a service the orchestrator cannot place.
    pub fn push_unscheduled_service(&self, spec: ServiceResourceSpec) {
        self.state.lock().unwrap().unscheduled.push(spec);
    }

    /// Drop all unscheduled services (demand satisfied).
    pub fn clear_unscheduled_services(&self) {
        self.state.lock().unwrap().unscheduled.clear();
    }
}

impl SwarmClient for InMemorySwarm {
    async fn list_nodes(&self) -> CloudResult<Vec<SwarmNode>> {
        let state = self.state.lock().unwrap();
        let mut nodes: Vec<_> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn read_label(&self, node_id: &NodeId, key: &str) -> CloudResult<Option<String>> {
        let state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get(node_id)
            .ok_or_else(|| CloudError::SwarmApi(format!("no such node: {node_id}")))?;
        Ok(node.labels.get(key).cloned())
    }

    async fn write_label(&self, node_id: &NodeId, key: &str, value: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CloudError::SwarmApi(format!("no such node: {node_id}")))?;
        node.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_label(&self, node_id: &NodeId, key: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CloudError::SwarmApi(format!("no such node: {node_id}")))?;
        node.labels.remove(key);
        Ok(())
    }

    async fn list_unscheduled_services(&self) -> CloudResult<Vec<ServiceResourceSpec>> {
        Ok(self.state.lock().unwrap().unscheduled.clone())
    }

    async fn remove_node(&self, node_id: &NodeId) -> CloudResult<()> {
        self.state.lock().unwrap().nodes.remove(node_id);
        Ok(())
    }
}

// ── Dask ──────────────────────────────────────────────────────────

/// A Dask scheduler in a box.
#[derive(Clone, Default)]
pub struct InMemoryDask {
    tasks: Arc<Mutex<Vec<DaskTask>>>,
}

impl InMemoryDask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_task(&self, task: DaskTask) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn clear_tasks(&self) {
        self.tasks.lock().unwrap().clear();
    }
}

impl DaskClient for InMemoryDask {
    async fn list_pending_tasks(&self) -> CloudResult<Vec<DaskTask>> {
        Ok(self.tasks.lock().unwrap().clone())
    }
}
