//! Clients that talk to the mesh manager.
//!
//! [`NetworkServiceClient`] is the seam to the transport. A request passes through a [`ClientChain`]: first the
//! [`MechanismClient`] for the descriptor's mechanism attaches its preference, then the core transport client sends it.

mod device;
mod kernel;
mod selector;

pub use device::{parse_devices_cgroup, DeviceMechanismClient, PROC_SELF_CGROUP};
pub use kernel::{netns_inode_url, KernelMechanismClient, THREAD_NETNS_PATH};
pub use selector::MechanismClient;

use crate::connection::{Connection, NetworkServiceRequest};
use crate::context::{CallContext, Interrupted};
use std::future::Future;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("The mesh manager rejected the request. {0}")]
    Rejected(String),
    #[error("Could not reach the mesh manager. {0}")]
    Transport(String),
    #[error("Mechanism setup failed. {0}")]
    Mechanism(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ClientError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ClientError::Transport(msg.into())
    }

    pub fn mechanism(msg: impl Into<String>) -> Self {
        ClientError::Mechanism(msg.into())
    }
}

/// The request/close half of the mesh manager API.
pub trait NetworkServiceClient: Send + Sync {
    /// Asks the mesh for a connection. The returned connection carries the negotiated mechanism and endpoint.
    fn request(
        &self,
        ctx: &CallContext,
        request: NetworkServiceRequest,
    ) -> impl Future<Output = Result<Connection, ClientError>> + Send;

    /// Releases a previously established connection.
    fn close(&self, ctx: &CallContext, connection: &Connection) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// A mechanism client in front of the core transport client.
#[derive(Clone, Debug)]
pub struct ClientChain<C> {
    mechanism: MechanismClient,
    next: C,
}

impl<C: NetworkServiceClient> ClientChain<C> {
    pub fn new(mechanism: MechanismClient, next: C) -> Self {
        Self { mechanism, next }
    }

    pub fn mechanism(&self) -> &MechanismClient {
        &self.mechanism
    }
}

impl<C: NetworkServiceClient> NetworkServiceClient for ClientChain<C> {
    async fn request(&self, ctx: &CallContext, mut request: NetworkServiceRequest) -> Result<Connection, ClientError> {
        self.mechanism.prepare(ctx, &mut request).await?;
        self.next.request(ctx, request).await
    }

    async fn close(&self, ctx: &CallContext, connection: &Connection) -> Result<(), ClientError> {
        let result = self.next.close(ctx, connection).await;
        self.mechanism.release(ctx, connection);
        result
    }
}
