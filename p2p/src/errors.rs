use crate::identity::IdentityError;
use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerConnectionError {
    #[error("Transport error: {0}")]
    TransportError(#[from] libp2p::TransportError<std::io::Error>),
    #[error("Noise protocol error: {0}")]
    NoiseError(#[from] libp2p::noise::Error),
    #[error("Could not set up the network behaviour. {0}")]
    BehaviourError(String),
    #[error("Dial error: {0}")]
    DialError(#[from] libp2p::swarm::DialError),
    #[error("Could not reach {0} within the dial timeout")]
    DialTimeout(Multiaddr),
    #[error("The address must end with the peer id of the mesh manager (/p2p/...)")]
    MissingPeerId,
    #[error("The network event loop has stopped. {0}")]
    SendError(#[from] futures::channel::mpsc::SendError),
    #[error("The network event loop dropped the request")]
    EventLoopGone(#[from] futures::channel::oneshot::Canceled),
    #[error("Request to the mesh manager failed. {0}")]
    OutboundFailure(String),
    #[error("The connection to the mesh manager was closed")]
    ConnectionClosed,
    #[error("The mesh manager returned an error. {0}")]
    Remote(#[from] RemoteServerError),
    #[error("Unexpected response from the mesh manager: {0}")]
    UnexpectedResponse(String),
    #[error("Could not sign the path token. {0}")]
    Identity(#[from] IdentityError),
}

/// An error code from the mesh manager, akin to an HTTP error code.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteServerError {
    #[error("The mesh manager is shutting down and cannot handle new requests. Try again later.")]
    ServerShuttingDown,
    #[error("No endpoint provides network service '{0}'")]
    NoEndpoint(String),
    #[error("Connection {0} is not known to the mesh manager")]
    UnknownConnection(String),
    #[error("No monitor subscription with id {0}")]
    UnknownSubscription(u64),
    #[error("The path token was rejected. {0}")]
    Unauthorized(String),
    #[error("The request is not supported by this peer")]
    Unsupported,
    #[error("An internal error occurred on the mesh manager. {0}")]
    InternalError(String),
}

impl RemoteServerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        RemoteServerError::InternalError(msg.into())
    }
}
