//! The scaling decision engine.
//!
//! Each tick re-derives the whole world: snapshot the cluster,
//! estimate unmet demand, reuse idle capacity, size and launch new
//! machines, and terminate the ones that idled past their grace
//! period. No decision state survives between ticks.

mod demand;
mod engine;

pub use demand::{ComputationalDemand, DemandSource, DynamicDemand};
pub use engine::{startup_script, ScalingEngine};
