pub mod client;
pub mod connection;
pub mod context;
pub mod descriptor;
pub mod lifecycle;
pub mod liveness;
pub mod mechanism;
pub mod monitor;
pub mod request_loop;
pub mod runner;

#[cfg(feature = "dummy_client")]
pub mod dummy_impl;

#[cfg(all(test, feature = "dummy_client"))]
mod tests;

pub use context::CallContext;
pub use descriptor::{ClientDefaults, ServiceDescriptor};
pub use mechanism::{Mechanism, MechanismType};
