//! The control loop.
//!
//! One tick: snapshot the cluster, estimate unmet demand, reuse
//! drained and booting capacity, bin-pack the rest onto new machines,
//! launch, then terminate what idled out. Mutations are applied one
//! machine at a time so an interrupted tick leaves nothing half
//! written; the next tick re-reads label truth and converges.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fleetgrid_cloud::{Ec2Client, SwarmClient};
use fleetgrid_cluster::{ClusterAnalyzer, TerminationTimer};
use fleetgrid_metrics::FleetReporter;
use fleetgrid_placement::{closest_instance_policy, find_best_fitting};
use fleetgrid_state::{
    AssociatedInstance, Clock, Cluster, EC2InstanceConfig, EC2InstanceData, EC2InstanceType,
    InstanceId, Resources, ScalingError, Settings, SERVICE_READY_LABEL,
    SERVICE_READY_SINCE_LABEL, TERMINATION_STARTED_AT_LABEL,
};

use crate::demand::DemandSource;

/// The periodic scaling decision engine. Holds no pool state of its
/// own: everything is re-derived from the collaborators every tick.
pub struct ScalingEngine<E, S, M, C> {
    settings: Arc<Settings>,
    ec2: E,
    swarm: S,
    demand: M,
    analyzer: ClusterAnalyzer<C>,
    timer: TerminationTimer<C>,
    reporter: FleetReporter,
    clock: C,
}

impl<E, S, M, C> ScalingEngine<E, S, M, C>
where
    E: Ec2Client,
    S: SwarmClient,
    M: DemandSource,
    C: Clock + Clone,
{
    pub fn new(
        settings: Arc<Settings>,
        ec2: E,
        swarm: S,
        demand: M,
        reporter: FleetReporter,
        clock: C,
    ) -> Self {
        let analyzer = ClusterAnalyzer::new(clock.clone(), settings.max_start_time);
        let timer = TerminationTimer::new(clock.clone(), settings.time_before_termination);
        Self {
            settings,
            ec2,
            swarm,
            demand,
            analyzer,
            timer,
            reporter,
            clock,
        }
    }

    /// Run one complete scaling pass and return the final snapshot.
    pub async fn tick(&self) -> anyhow::Result<Cluster> {
        let instances = self.ec2.describe_instances().await?;
        let nodes = self.swarm.list_nodes().await?;
        let cluster = self.analyzer.analyze(instances, &nodes);

        let pending_demand = self.demand.estimate_pending_demand().await?;
        let catalog = self.allowed_catalog().await?;

        let (cluster, unmet) = self
            .activate_drained_nodes(cluster, &catalog, pending_demand)
            .await;
        let unmet = assign_to_booting(&cluster, &catalog, unmet);

        let needed = self.needed_instances(&cluster, &catalog, unmet);
        let cluster = self.scale_up(cluster, needed).await;
        let cluster = self.scale_down(cluster).await;

        self.reporter.observe(&cluster);
        Ok(cluster)
    }

    /// The control loop: `IDLE → TICKING → IDLE → … → STOPPED`. A tick
    /// in flight always runs to completion; the shutdown signal is
    /// honored between ticks.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.poll_interval.as_secs(),
            "scaling loop started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scaling tick failed, retrying next tick");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scaling loop shutting down");
                    break;
                }
            }
        }
    }

    /// The allowed instance catalog, in configured preference order.
    async fn allowed_catalog(&self) -> anyhow::Result<Vec<EC2InstanceType>> {
        let allowed = &self.settings.allowed_instance_types;
        let mut catalog = self.ec2.instance_type_capabilities(allowed).await?;
        if catalog.is_empty() {
            return Err(ScalingError::Configuration(
                "none of the allowed EC2 instance types are available".to_string(),
            )
            .into());
        }
        catalog.sort_by_key(|t| {
            allowed
                .iter()
                .position(|name| name == &t.name)
                .unwrap_or(usize::MAX)
        });
        Ok(catalog)
    }

    /// Assign demand to draining nodes before buying anything. A
    /// drained node that receives work flips back to ready with a
    /// fresh heartbeat. Returns the snapshot with activated nodes
    /// moved, and the demand that still has no machine.
    async fn activate_drained_nodes(
        &self,
        cluster: Cluster,
        catalog: &[EC2InstanceType],
        pending_demand: Vec<Resources>,
    ) -> (Cluster, Vec<Resources>) {
        if pending_demand.is_empty() || cluster.draining_nodes.is_empty() {
            return (cluster, pending_demand);
        }

        let mut hosts: Vec<(Resources, Resources, bool)> = cluster
            .draining_nodes
            .iter()
            .map(|node| {
                let capacity = capacity_of(catalog, &node.ec2_instance.instance_type);
                (capacity, Resources::none(), false)
            })
            .collect();

        let mut unmet = Vec::new();
        for item in pending_demand {
            match try_assign(&item, &mut hosts) {
                Some(index) => hosts[index].2 = true,
                None => unmet.push(item),
            }
        }

        let now = self.clock.epoch_secs();
        let mut cluster = cluster;
        let draining = std::mem::take(&mut cluster.draining_nodes);
        for (node, (_, _, used)) in draining.into_iter().zip(hosts) {
            if !used {
                cluster.draining_nodes.push(node);
                continue;
            }
            match self.activate_node(&node, now).await {
                Ok(activated) => {
                    info!(id = %activated.ec2_instance.id, "drained node re-activated for new work");
                    cluster.ready_nodes.push(activated);
                }
                Err(e) => {
                    warn!(
                        id = %node.ec2_instance.id,
                        error = %e,
                        "failed to re-activate drained node"
                    );
                    cluster.draining_nodes.push(node);
                }
            }
        }

        (cluster, unmet)
    }

    /// Flip one drained node back to ready, one label at a time, and
    /// return the node as the snapshot should now see it.
    async fn activate_node(
        &self,
        instance: &AssociatedInstance,
        now: u64,
    ) -> anyhow::Result<AssociatedInstance> {
        let node_id = &instance.node.id;
        self.swarm
            .write_label(node_id, SERVICE_READY_LABEL, "true")
            .await?;
        self.swarm
            .write_label(node_id, SERVICE_READY_SINCE_LABEL, &now.to_string())
            .await?;

        let mut activated = instance.clone();
        activated
            .node
            .labels
            .insert(SERVICE_READY_LABEL.to_string(), "true".to_string());
        activated
            .node
            .labels
            .insert(SERVICE_READY_SINCE_LABEL.to_string(), now.to_string());
        Ok(activated)
    }

    /// Bin-pack the still-unmet demand onto new machines, then top up
    /// the warm reserve and apply the pool size cap.
    fn needed_instances(
        &self,
        cluster: &Cluster,
        catalog: &[EC2InstanceType],
        unmet: Vec<Resources>,
    ) -> Vec<(EC2InstanceType, u32)> {
        // each planned machine can host several items
        let mut planned: Vec<(EC2InstanceType, Resources)> = Vec::new();
        'items: for item in unmet {
            for (instance_type, assigned) in planned.iter_mut() {
                let total = assigned.accumulated_with(&item);
                if cpu_ram_fit(&total, &instance_type.as_resources()) {
                    *assigned = total;
                    continue 'items;
                }
            }

            match find_best_fitting(catalog, &item, closest_instance_policy) {
                Ok(instance_type) => planned.push((instance_type, item)),
                Err(e @ ScalingError::Ec2InstanceNotFound { .. }) => {
                    warn!(
                        cpus = item.cpus,
                        ram = item.ram,
                        error = %e,
                        "workload item cannot be scheduled this tick"
                    );
                }
                Err(e) => {
                    error!(error = %e, "instance selection failed");
                }
            }
        }

        let mut counts: Vec<(EC2InstanceType, u32)> = Vec::new();
        for (instance_type, _) in planned {
            match counts.iter_mut().find(|(t, _)| t.name == instance_type.name) {
                Some((_, count)) => *count += 1,
                None => counts.push((instance_type, 1)),
            }
        }

        // warm reserve: keep a buffer of spare machines around
        let spare = cluster.draining_nodes.len() + cluster.pending_instances.len();
        let missing_buffer = (self.settings.machines_buffer as usize).saturating_sub(spare);
        if missing_buffer > 0 {
            let default_type = catalog[0].clone();
            match counts.iter_mut().find(|(t, _)| t.name == default_type.name) {
                Some((_, count)) => *count += missing_buffer as u32,
                None => counts.push((default_type, missing_buffer as u32)),
            }
        }

        self.cap_to_pool_size(cluster, counts)
    }

    fn cap_to_pool_size(
        &self,
        cluster: &Cluster,
        counts: Vec<(EC2InstanceType, u32)>,
    ) -> Vec<(EC2InstanceType, u32)> {
        let mut allowed_new = self
            .settings
            .max_instances
            .saturating_sub(cluster.total_number_of_machines() as u32);

        let mut capped = Vec::new();
        let mut dropped = 0u32;
        for (instance_type, count) in counts {
            let granted = count.min(allowed_new);
            allowed_new -= granted;
            dropped += count - granted;
            if granted > 0 {
                capped.push((instance_type, granted));
            }
        }
        if dropped > 0 {
            warn!(
                dropped,
                error = %ScalingError::Ec2TooManyInstances {
                    limit: self.settings.max_instances,
                },
                "demand exceeds the maximum pool size"
            );
        }
        capped
    }

    /// One launch call per needed type. Partial fulfillment is fine;
    /// a failed call only costs this tick.
    async fn scale_up(
        &self,
        cluster: Cluster,
        needed: Vec<(EC2InstanceType, u32)>,
    ) -> Cluster {
        if needed.is_empty() {
            return cluster;
        }

        let mut cluster = cluster;
        for (instance_type, count) in needed {
            let config = launch_config(&self.settings, &instance_type);
            match self.ec2.launch_instances(&config, 1, count).await {
                Ok(launched) => {
                    info!(
                        instance_type = %instance_type.name,
                        requested = count,
                        granted = launched.len(),
                        "launched new machines"
                    );
                    self.reporter
                        .record_launched(&instance_type.name, launched.len() as u64);
                    cluster.pending_instances.extend(launched);
                }
                Err(e) => {
                    error!(
                        instance_type = %instance_type.name,
                        error = %e,
                        "launch failed"
                    );
                }
            }
        }

        cluster
    }

    /// Terminate machines past their grace period, machines stuck in
    /// the termination process from a previous tick, and broken boots.
    async fn scale_down(&self, cluster: Cluster) -> Cluster {
        let flagged: Vec<AssociatedInstance> = self
            .timer
            .find_terminateable(&cluster)
            .into_iter()
            .cloned()
            .collect();

        let mut terminated_ids: HashSet<InstanceId> = HashSet::new();
        let now = self.clock.epoch_secs();

        for instance in &flagged {
            if let Err(e) = self.terminate_machine(instance, Some(now)).await {
                warn!(
                    id = %instance.ec2_instance.id,
                    error = %e,
                    "termination incomplete, will retry next tick"
                );
                continue;
            }
            terminated_ids.insert(instance.ec2_instance.id.clone());
        }

        // machines whose terminate call failed on an earlier tick
        for instance in &cluster.pending_termination_nodes {
            if let Err(e) = self.terminate_machine(instance, None).await {
                warn!(
                    id = %instance.ec2_instance.id,
                    error = %e,
                    "termination retry failed"
                );
                continue;
            }
            terminated_ids.insert(instance.ec2_instance.id.clone());
        }

        for instance in &cluster.broken_instances {
            match self.ec2.terminate_instances(&[instance.id.clone()]).await {
                Ok(()) => {
                    warn!(id = %instance.id, "terminated broken machine that never joined");
                    terminated_ids.insert(instance.id.clone());
                }
                Err(e) => error!(id = %instance.id, error = %e, "failed to terminate broken machine"),
            }
        }

        if terminated_ids.is_empty() {
            return cluster;
        }

        let mut cluster = cluster;
        drain_terminated(
            &mut cluster.ready_nodes,
            &terminated_ids,
            &mut cluster.terminated_instances,
        );
        drain_terminated(
            &mut cluster.draining_nodes,
            &terminated_ids,
            &mut cluster.terminated_instances,
        );
        drain_terminated(
            &mut cluster.pending_termination_nodes,
            &terminated_ids,
            &mut cluster.terminated_instances,
        );
        for instance in std::mem::take(&mut cluster.broken_instances) {
            if terminated_ids.contains(&instance.id) {
                cluster.terminated_instances.push(instance);
            } else {
                cluster.broken_instances.push(instance);
            }
        }

        cluster
    }

    /// Take one machine out of service: mark the termination start on
    /// its node (unless already marked), terminate the instance, then
    /// drop the node from the swarm. Each step is independently safe
    /// to interrupt; a partial pass is picked up on the next tick.
    async fn terminate_machine(
        &self,
        instance: &AssociatedInstance,
        mark_started_at: Option<u64>,
    ) -> anyhow::Result<()> {
        if let Some(now) = mark_started_at {
            self.swarm
                .write_label(
                    &instance.node.id,
                    TERMINATION_STARTED_AT_LABEL,
                    &now.to_string(),
                )
                .await?;
        }
        self.ec2
            .terminate_instances(&[instance.ec2_instance.id.clone()])
            .await?;
        self.swarm.remove_node(&instance.node.id).await?;
        info!(
            id = %instance.ec2_instance.id,
            node = %instance.node.id,
            "machine terminated"
        );
        Ok(())
    }
}

/// Move nodes whose machine was just terminated out of a bucket and
/// into the terminated record.
fn drain_terminated(
    nodes: &mut Vec<AssociatedInstance>,
    terminated_ids: &HashSet<InstanceId>,
    terminated: &mut Vec<EC2InstanceData>,
) {
    let kept = std::mem::take(nodes)
        .into_iter()
        .filter_map(|node| {
            if terminated_ids.contains(&node.ec2_instance.id) {
                terminated.push(node.ec2_instance);
                None
            } else {
                Some(node)
            }
        })
        .collect();
    *nodes = kept;
}

/// Demand that fits onto machines that are already booting does not
/// justify new launches. Pure bookkeeping, no writes.
fn assign_to_booting(
    cluster: &Cluster,
    catalog: &[EC2InstanceType],
    unmet: Vec<Resources>,
) -> Vec<Resources> {
    if unmet.is_empty() || cluster.pending_instances.is_empty() {
        return unmet;
    }

    let mut hosts: Vec<(Resources, Resources, bool)> = cluster
        .pending_instances
        .iter()
        .map(|instance| {
            (
                capacity_of(catalog, &instance.instance_type),
                Resources::none(),
                false,
            )
        })
        .collect();

    let mut still_unmet = Vec::new();
    for item in unmet {
        if try_assign(&item, &mut hosts).is_none() {
            still_unmet.push(item);
        }
    }
    debug!(
        absorbed = hosts.iter().filter(|(_, _, used)| *used).count(),
        remaining = still_unmet.len(),
        "booting machines absorb pending demand"
    );
    still_unmet
}

/// Greedy first-fit of one item onto a host list of
/// `(capacity, assigned, used)` entries.
fn try_assign(item: &Resources, hosts: &mut [(Resources, Resources, bool)]) -> Option<usize> {
    for (index, (capacity, assigned, used)) in hosts.iter_mut().enumerate() {
        let total = assigned.accumulated_with(item);
        if cpu_ram_fit(&total, capacity) {
            *assigned = total;
            *used = true;
            return Some(index);
        }
    }
    None
}

/// Machine capacity only spans the cpu/ram axes; generic resources are
/// claims against the scheduler, not the machine catalog.
fn cpu_ram_fit(total: &Resources, capacity: &Resources) -> bool {
    total.cpus <= capacity.cpus && total.ram <= capacity.ram
}

fn capacity_of(catalog: &[EC2InstanceType], instance_type: &str) -> Resources {
    catalog
        .iter()
        .find(|t| t.name == instance_type)
        .map(EC2InstanceType::as_resources)
        .unwrap_or_else(Resources::none)
}

/// The machine boot script: pre-pulls the configured images so
/// services start without a registry round-trip.
pub fn startup_script(settings: &Settings) -> String {
    let mut script = String::from("#!/bin/bash\nset -o errexit\nset -o nounset\n");
    for image in &settings.pre_pull_images {
        script.push_str("docker pull ");
        script.push_str(image);
        script.push('\n');
    }
    script
}

fn launch_config(settings: &Settings, instance_type: &EC2InstanceType) -> EC2InstanceConfig {
    EC2InstanceConfig {
        instance_type: instance_type.clone(),
        tags: settings.custom_tags.clone(),
        startup_script: startup_script(settings),
        ami_id: settings.ami_id.clone(),
        key_name: settings.key_name.clone(),
        security_group_ids: settings.security_group_ids.clone(),
        subnet_id: settings.subnet_id.clone(),
        iam_instance_profile: settings.iam_instance_profile.clone(),
    }
}
