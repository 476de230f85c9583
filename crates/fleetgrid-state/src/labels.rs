//! The node label vocabulary.
//!
//! Machine lifecycle state is not stored anywhere in this service; it
//! is re-derived every tick from these labels. The keys are a fixed,
//! versioned contract shared with the provisioning path: renaming one
//! breaks the node/instance association.

use tracing::warn;

use crate::types::SwarmNode;

/// `"true"` once the node's managed services report ready; `"false"`
/// while the node drains.
pub const SERVICE_READY_LABEL: &str = "service-ready";

/// Epoch-seconds timestamp of the last readiness report. Doubles as
/// the heartbeat timestamp consumed by the termination timer.
pub const SERVICE_READY_SINCE_LABEL: &str = "service-ready-since";

/// Epoch-seconds timestamp set when the termination process begins.
pub const TERMINATION_STARTED_AT_LABEL: &str = "termination-started-at";

/// The EC2 instance id a node booted from. Written by the provisioning
/// path when the machine joins the swarm; read here to associate.
pub const INSTANCE_ID_LABEL: &str = "instance-id";

/// Whether the node advertises readiness. Anything other than a
/// literal `"true"` (including a missing label) counts as not ready.
pub fn node_is_service_ready(node: &SwarmNode) -> bool {
    node.labels.get(SERVICE_READY_LABEL).map(String::as_str) == Some("true")
}

/// The last heartbeat timestamp, if present and parsable.
pub fn node_ready_since(node: &SwarmNode) -> Option<u64> {
    parse_timestamp_label(node, SERVICE_READY_SINCE_LABEL)
}

/// When the termination process started, if it has.
pub fn node_termination_started_at(node: &SwarmNode) -> Option<u64> {
    parse_timestamp_label(node, TERMINATION_STARTED_AT_LABEL)
}

/// A corrupt label value must not crash the tick: log it and treat the
/// label as absent.
fn parse_timestamp_label(node: &SwarmNode, key: &str) -> Option<u64> {
    let value = node.labels.get(key)?;
    match value.parse::<u64>() {
        Ok(ts) => Some(ts),
        Err(_) => {
            warn!(node = %node.id, label = key, value = %value, "unparsable timestamp label, ignoring");
            None
        }
    }
}
