use crate::client::{ClientError, DeviceMechanismClient, KernelMechanismClient};
use crate::connection::{Connection, NetworkServiceRequest};
use crate::context::CallContext;
use crate::mechanism::{MechanismType, DEFAULT_VFIO_DIR};
use log::*;

/// The mechanism-specific step of a client chain. One variant per [`MechanismType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MechanismClient {
    Kernel(KernelMechanismClient),
    Device(DeviceMechanismClient),
}

impl MechanismClient {
    /// Builds the client for `mechanism`. Nothing is started until the first request.
    ///
    /// For kernel mechanisms the first path segment is the interface name. Merged descriptors are guaranteed to
    /// carry exactly one.
    pub fn select(mechanism: MechanismType, path_segments: &[String]) -> Self {
        match mechanism {
            MechanismType::Kernel => {
                let name = path_segments.first().cloned().unwrap_or_default();
                MechanismClient::Kernel(KernelMechanismClient::new(name))
            }
            MechanismType::Device => MechanismClient::Device(DeviceMechanismClient::new(DEFAULT_VFIO_DIR)),
        }
    }

    pub fn mechanism_type(&self) -> MechanismType {
        match self {
            MechanismClient::Kernel(_) => MechanismType::Kernel,
            MechanismClient::Device(_) => MechanismType::Device,
        }
    }

    /// Attaches this client's mechanism preference to the request. A connection that already carries a negotiated
    /// mechanism is a refresh, and is sent as is.
    pub async fn prepare(&self, ctx: &CallContext, request: &mut NetworkServiceRequest) -> Result<(), ClientError> {
        if request.connection.mechanism.is_some() {
            trace!("{ctx} Connection already has a mechanism; not adding a preference");
            return Ok(());
        }
        match self {
            MechanismClient::Kernel(client) => client.prepare(ctx, request).await,
            MechanismClient::Device(client) => client.prepare(ctx, request).await,
        }
    }

    /// Called after a connection has been closed. The forwarder owns the data plane, so there is nothing to undo
    /// locally.
    pub fn release(&self, ctx: &CallContext, connection: &Connection) {
        debug!("{ctx} Released {} mechanism for connection {}", self.mechanism_type(), connection.id);
    }
}
