//! End-to-end lifecycle of one machine through the control loop:
//! launch for pending work, join, idle out, terminate, and the
//! heartbeat path that keeps a machine alive.

use std::collections::HashMap;
use std::sync::Arc;

use fleetgrid_autoscale::{DynamicDemand, ScalingEngine};
use fleetgrid_cloud::{Ec2Client, InMemoryEc2, InMemorySwarm, SwarmClient, SwarmLabelStore};
use fleetgrid_cluster::TerminationTimer;
use fleetgrid_metrics::FleetReporter;
use fleetgrid_state::{
    Clock, EC2InstanceType, ManualClock, Resources, ServiceResourceSpec, ServiceResources, Settings,
    SERVICE_READY_LABEL, SERVICE_READY_SINCE_LABEL,
};

const GIB: u64 = 1024 * 1024 * 1024;
const GRACE_SECS: u64 = 10 * 60;

fn settings() -> Arc<Settings> {
    let env: HashMap<String, String> = [
        ("EC2_INSTANCES_ALLOWED_TYPES", "m5.large"),
        ("EC2_INSTANCES_MAX_INSTANCES", "5"),
        ("EC2_INSTANCES_TIME_BEFORE_TERMINATION", "0:10:00"),
        ("EC2_INSTANCES_MAX_START_TIME", "1:00:00"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Arc::new(Settings::from_env_map(&env).unwrap())
}

fn catalog() -> Vec<EC2InstanceType> {
    vec![EC2InstanceType {
        name: "m5.large".to_string(),
        cpus: 2.0,
        ram: 8 * GIB,
    }]
}

struct Harness {
    clock: ManualClock,
    ec2: InMemoryEc2,
    swarm: InMemorySwarm,
    engine: ScalingEngine<InMemoryEc2, InMemorySwarm, DynamicDemand<InMemorySwarm>, ManualClock>,
}

fn harness() -> Harness {
    let clock = ManualClock::new(1_000_000);
    let ec2 = InMemoryEc2::new(clock.clone(), catalog());
    let swarm = InMemorySwarm::new();
    let engine = ScalingEngine::new(
        settings(),
        ec2.clone(),
        swarm.clone(),
        DynamicDemand::new(swarm.clone()),
        FleetReporter::new(),
        clock.clone(),
    );
    Harness {
        clock,
        ec2,
        swarm,
        engine,
    }
}

fn one_service() -> ServiceResourceSpec {
    ServiceResourceSpec {
        service_id: "svc-user-1".to_string(),
        reservations: Some(ServiceResources {
            nano_cpus: 1_000_000_000,
            memory_bytes: 2 * GIB,
        }),
        limits: None,
    }
}

/// Simulate the machine booting into the swarm and reporting ready,
/// and the orchestrator placing the waiting work on it.
async fn join_and_get_ready(h: &Harness, instance_id: &str) -> String {
    let node_id = h.swarm.join_node("worker-1", instance_id);
    h.swarm
        .write_label(&node_id, SERVICE_READY_LABEL, "true")
        .await
        .unwrap();
    h.swarm
        .write_label(
            &node_id,
            SERVICE_READY_SINCE_LABEL,
            &h.clock.epoch_secs().to_string(),
        )
        .await
        .unwrap();
    h.swarm.clear_unscheduled_services();
    node_id
}

#[tokio::test]
async fn machine_lifecycle_without_heartbeat() {
    let h = harness();
    h.swarm.push_unscheduled_service(one_service());

    // pending work: exactly one machine is launched
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 1);
    assert_eq!(cluster.pending_instances.len(), 1);
    let instance_id = cluster.pending_instances[0].id.clone();

    // a second tick while it boots changes nothing
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 1);
    assert_eq!(h.ec2.describe_instances().await.unwrap().len(), 1);

    // the machine joins and reports ready
    join_and_get_ready(&h, &instance_id).await;
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.ready_nodes.len(), 1);
    assert_eq!(cluster.total_number_of_machines(), 1);

    // immediately afterwards: grace period not elapsed, no change
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.ready_nodes.len(), 1);
    assert!(h.ec2.terminated_ids().is_empty());

    // the grace period elapses with no heartbeat: machine is removed
    h.clock.advance(GRACE_SECS);
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 0);
    assert_eq!(cluster.terminated_instances.len(), 1);
    assert_eq!(h.ec2.terminated_ids(), vec![instance_id]);
    assert!(h.swarm.list_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_resets_the_grace_period() {
    let h = harness();
    h.swarm.push_unscheduled_service(one_service());

    let cluster = h.engine.tick().await.unwrap();
    let instance_id = cluster.pending_instances[0].id.clone();
    join_and_get_ready(&h, &instance_id).await;

    // half the grace period passes, then a keep-alive arrives through
    // the label store
    h.clock.advance(GRACE_SECS / 2);
    let timer = TerminationTimer::new(h.clock.clone(), settings().time_before_termination);
    let labels = SwarmLabelStore::new(h.swarm.clone());
    timer.record_heartbeat(&labels, &instance_id).await.unwrap();

    // the original deadline passes: the machine survives
    h.clock.advance(GRACE_SECS / 2);
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.ready_nodes.len(), 1);
    assert!(h.ec2.terminated_ids().is_empty());

    // a full grace period after the heartbeat it is terminated
    h.clock.advance(GRACE_SECS / 2);
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 0);
    assert_eq!(h.ec2.terminated_ids(), vec![instance_id]);
}

#[tokio::test]
async fn demand_larger_than_one_machine_fans_out() {
    let h = harness();
    for i in 0..3 {
        h.swarm.push_unscheduled_service(ServiceResourceSpec {
            service_id: format!("svc-{i}"),
            reservations: Some(ServiceResources {
                nano_cpus: 2_000_000_000,
                memory_bytes: 6 * GIB,
            }),
            limits: None,
        });
    }

    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.pending_instances.len(), 3);

    // a service that fits no allowed type is skipped, not fatal
    h.swarm.push_unscheduled_service(ServiceResourceSpec {
        service_id: "svc-huge".to_string(),
        reservations: Some(ServiceResources {
            nano_cpus: 64_000_000_000,
            memory_bytes: GIB,
        }),
        limits: None,
    });
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 3);
}

#[tokio::test]
async fn resourceless_service_is_never_schedulable() {
    let h = harness();
    h.swarm.push_unscheduled_service(ServiceResourceSpec {
        service_id: "svc-null".to_string(),
        reservations: None,
        limits: None,
    });

    // a null requirement matches no machine: nothing is launched
    let cluster = h.engine.tick().await.unwrap();
    assert_eq!(cluster.total_number_of_machines(), 0);

    let err = fleetgrid_placement::find_best_fitting(
        &catalog(),
        &Resources::none(),
        fleetgrid_placement::closest_instance_policy,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        fleetgrid_state::ScalingError::Ec2InstanceNotFound { .. }
    ));
}
