//! Peer-to-peer transport to the mesh manager.
//!
//! [`new_network`] builds the swarm and hands back a [`Client`] and the [`EventLoop`] that must be spawned to drive
//! it. [`MeshApi`] wraps a connected client and implements the request, close and monitor calls the `libnsc` runner
//! needs.
mod behaviour;
pub mod errors;
mod event_loop;
mod identity;
pub mod message_types;
mod network_client;

pub use event_loop::EventLoop;
pub use identity::{verify_token, ClientIdentity, IdentityError};
pub use message_types::{ClientCommand, MeshRequest, MeshResponse};
pub use network_client::{new_network, Client, MeshApi, PeerConnection};
