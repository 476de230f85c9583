//! Instrumentation for the autoscaler.
//!
//! Every cluster snapshot feeds the reporter, which maintains one
//! gauge family per lifecycle bucket (keyed by instance-type name) and
//! a monotonic counter of launches per type, then renders them in the
//! Prometheus text format.

mod prometheus;
mod reporter;

pub use prometheus::render_prometheus;
pub use reporter::{FleetReporter, TrackedGauge};
