//! Idle termination tracking.
//!
//! A machine's idle time is measured from its last heartbeat, which is
//! the `service-ready-since` label (refreshed on activation and by the
//! keep-alive path). The timer keeps no state of its own between
//! ticks: it reads the snapshot, so a heartbeat written by anyone is
//! honored on the very next tick.

use std::time::Duration;

use tracing::{debug, info};

use fleetgrid_cloud::{CloudResult, LabelStore};
use fleetgrid_state::{
    node_ready_since, AssociatedInstance, Clock, Cluster, InstanceId, SERVICE_READY_SINCE_LABEL,
};

/// Flags machines whose idle time exceeded the grace period.
pub struct TerminationTimer<C> {
    clock: C,
    /// Effective grace period, already clamped by settings parsing.
    grace_period: Duration,
}

impl<C: Clock> TerminationTimer<C> {
    pub fn new(clock: C, grace_period: Duration) -> Self {
        Self {
            clock,
            grace_period,
        }
    }

    /// Seconds since the machine's last heartbeat. A machine that
    /// never reported ready counts from its launch time.
    pub fn idle_secs(&self, instance: &AssociatedInstance) -> u64 {
        let last_heartbeat =
            node_ready_since(&instance.node).unwrap_or(instance.ec2_instance.launched_at);
        self.clock.epoch_secs().saturating_sub(last_heartbeat)
    }

    /// The `READY`/`DRAINING` machines past their grace period, in
    /// snapshot order.
    pub fn find_terminateable<'a>(&self, cluster: &'a Cluster) -> Vec<&'a AssociatedInstance> {
        let flagged: Vec<&AssociatedInstance> = cluster
            .active_nodes()
            .filter(|instance| {
                let idle = self.idle_secs(instance);
                let expired = idle >= self.grace_period.as_secs();
                if expired {
                    debug!(
                        id = %instance.ec2_instance.id,
                        idle_secs = idle,
                        grace_secs = self.grace_period.as_secs(),
                        "idle grace period elapsed"
                    );
                }
                expired
            })
            .collect();

        if !flagged.is_empty() {
            info!(count = flagged.len(), "machines are terminateable");
        }
        flagged
    }

    /// Record a liveness signal for a machine: resets its idle timer
    /// by rewriting the heartbeat label through the label store.
    pub async fn record_heartbeat<L: LabelStore>(
        &self,
        labels: &L,
        machine: &InstanceId,
    ) -> CloudResult<()> {
        let now = self.clock.epoch_secs();
        labels
            .set(machine, SERVICE_READY_SINCE_LABEL, &now.to_string())
            .await?;
        debug!(id = %machine, at = now, "heartbeat recorded");
        Ok(())
    }
}
