//! Capability interfaces for the external systems the autoscaler talks
//! to, plus in-memory backends.
//!
//! The decision logic only ever sees these traits. Production adapters
//! (the real EC2/Swarm/Dask clients, with their own retry and backoff)
//! implement them out of tree; the in-memory backends here power the
//! standalone daemon and the tests.

mod dask;
mod ec2;
mod error;
mod labelstore;
mod mem;
mod swarm;

pub use dask::DaskClient;
pub use ec2::Ec2Client;
pub use error::{CloudError, CloudResult};
pub use labelstore::{Ec2TagStore, LabelStore, SwarmLabelStore};
pub use mem::{InMemoryDask, InMemoryEc2, InMemorySwarm};
pub use swarm::SwarmClient;
