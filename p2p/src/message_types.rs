use crate::errors::{PeerConnectionError, RemoteServerError};
use futures::channel::{mpsc, oneshot};
use libnsc::connection::{Connection, ConnectionEvent, MonitorScopeSelector, NetworkServiceRequest};
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Protocol name of the request/response exchange with the mesh manager.
pub const MESH_PROTOCOL: &str = "/nsm-mesh/comms/1";
/// Protocol name announced through `identify`.
pub const IDENTIFY_PROTOCOL: &str = "/nsm-mesh/id/1";

/// Requests exchanged between a client and the mesh manager.
///
/// The client sends the first three. The manager pushes [`MeshRequest::ConnectionEvent`] to the client for every
/// change on a subscription, over the same connection.
#[derive(Debug, Serialize, Deserialize)]
pub enum MeshRequest {
    /// Ask for a new connection, a refresh of an existing one, or a reselect.
    Request(NetworkServiceRequest),
    /// Release a connection.
    Close(Connection),
    /// Open a server-push event stream. Events carry the client-chosen `subscription_id`.
    MonitorConnections { subscription_id: u64, selector: MonitorScopeSelector },
    ConnectionEvent { subscription_id: u64, event: ConnectionEvent },
}

/// The response to a [`MeshRequest`].
#[derive(Debug, Serialize, Deserialize)]
pub enum MeshResponse {
    Connection(Result<Connection, RemoteServerError>),
    Closed(Result<(), RemoteServerError>),
    Subscribed(Result<(), RemoteServerError>),
    EventAck,
    Error(RemoteServerError),
}

impl Display for MeshRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshRequest::Request(req) => write!(f, "Request({})", req.connection.id),
            MeshRequest::Close(conn) => write!(f, "Close({})", conn.id),
            MeshRequest::MonitorConnections { subscription_id, .. } => write!(f, "MonitorConnections(#{subscription_id})"),
            MeshRequest::ConnectionEvent { subscription_id, event } => {
                write!(f, "ConnectionEvent(#{subscription_id}, {:?})", event.event_type)
            }
        }
    }
}

impl Display for MeshResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshResponse::Connection(Ok(conn)) => write!(f, "Connection({conn})"),
            MeshResponse::Connection(Err(e)) => write!(f, "Connection refused: {e}"),
            MeshResponse::Closed(Ok(())) => write!(f, "Closed"),
            MeshResponse::Closed(Err(e)) => write!(f, "Close failed: {e}"),
            MeshResponse::Subscribed(Ok(())) => write!(f, "Subscribed"),
            MeshResponse::Subscribed(Err(e)) => write!(f, "Subscription refused: {e}"),
            MeshResponse::EventAck => write!(f, "EventAck"),
            MeshResponse::Error(e) => write!(f, "Error: {e}"),
        }
    }
}

/// The set of commands that the [`crate::Client`] sends to the network event loop.
///
/// There is one method in the `Client` for each of these commands.
#[derive(Debug)]
pub enum ClientCommand {
    /// Dial the mesh manager. Executed via [`crate::Client::dial`].
    Dial {
        peer_id: PeerId,
        peer_addr: Multiaddr,
        sender: oneshot::Sender<Result<(), PeerConnectionError>>,
    },
    /// A plain request/response exchange. Executed via [`crate::Client::send_request`].
    Request {
        peer_id: PeerId,
        request: MeshRequest,
        sender: oneshot::Sender<Result<MeshResponse, PeerConnectionError>>,
    },
    /// Open a monitor subscription; pushed events are forwarded to `events`. Executed via [`crate::Client::subscribe`].
    Subscribe {
        peer_id: PeerId,
        selector: MonitorScopeSelector,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        sender: oneshot::Sender<Result<(), PeerConnectionError>>,
    },
    Shutdown(oneshot::Sender<bool>),
}
