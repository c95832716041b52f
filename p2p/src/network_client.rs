use crate::behaviour::ConnectionBehavior;
use crate::errors::PeerConnectionError;
use crate::identity::ClientIdentity;
use crate::message_types::{IDENTIFY_PROTOCOL, MESH_PROTOCOL};
use crate::{ClientCommand, EventLoop, MeshRequest, MeshResponse};
use chrono::{TimeDelta, Utc};
use futures::channel::{mpsc, oneshot};
use futures::SinkExt;
use libnsc::client::{ClientError, NetworkServiceClient};
use libnsc::connection::{Connection, ConnectionEvent, MonitorScopeSelector, NetworkServiceRequest};
use libnsc::context::CallContext;
use libnsc::monitor::{MonitorConnectionClient, MonitorError};
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::{
    identify, noise,
    request_response::{json, Config as RequestResponseConfig, ProtocolSupport},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol,
};
use log::*;
use std::sync::Arc;
use std::time::Duration;

pub type PeerConnection = libp2p::Swarm<ConnectionBehavior>;

/// Creates the network components, namely:
///
/// - The network [`Client`] to interact with the event loop from anywhere within your application.
/// - The main [`EventLoop`] driving the network itself.
pub fn new_network(key: Keypair) -> Result<(Client, EventLoop), PeerConnectionError> {
    let swarm = libp2p::SwarmBuilder::with_existing_identity(key)
        .with_tokio()
        .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)?
        .with_behaviour(|key| {
            let config = identify::Config::new(IDENTIFY_PROTOCOL.to_string(), key.public())
                .with_interval(Duration::from_secs(5 * 60));
            let identify = identify::Behaviour::new(config);
            // Callers bound each request with their own timeout. This is only the transport's upper limit.
            let config = RequestResponseConfig::default().with_request_timeout(Duration::from_secs(60));
            let protocols = [(StreamProtocol::new(MESH_PROTOCOL), ProtocolSupport::Full)];
            let json = json::Behaviour::new(protocols, config);
            ConnectionBehavior { identify, json }
        })
        .map_err(|e| PeerConnectionError::BehaviourError(e.to_string()))?
        // The manager pushes monitor events over this connection, so it must outlive quiet periods.
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(24 * 60 * 60)))
        .build();

    let (command_sender, command_receiver) = mpsc::channel(0);
    Ok((Client { sender: command_sender }, EventLoop::new(swarm, command_receiver)))
}

/// A sender interface to the network event loop. It can be cheaply cloned and shared among threads.
///
/// Each method creates a one-shot channel, sends a [`ClientCommand`] carrying the sender half to the [`EventLoop`],
/// and waits for the answer. The client itself does no work.
#[derive(Clone)]
pub struct Client {
    sender: mpsc::Sender<ClientCommand>,
}

impl Client {
    /// Dial the given peer at the given address and return its peer id.
    /// The peer id is extracted from the address, and therefore must be present.
    ///
    /// Valid examples:
    /// - /ip4/192.168.1.100/tcp/5001/p2p/12D3KooW...
    /// - /dns4/nsmgr.example.com/tcp/5001/p2p/12D3KooW...
    pub async fn dial(&mut self, peer_addr: Multiaddr) -> Result<PeerId, PeerConnectionError> {
        let peer_id = match peer_addr.iter().last() {
            Some(Protocol::P2p(p)) => p,
            _ => return Err(PeerConnectionError::MissingPeerId),
        };
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Dial { peer_id, peer_addr, sender }).await?;
        receiver.await??;
        Ok(peer_id)
    }

    pub async fn send_request(
        &mut self,
        peer_id: PeerId,
        request: MeshRequest,
    ) -> Result<MeshResponse, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Request { peer_id, request, sender }).await?;
        receiver.await?
    }

    /// Opens a monitor subscription with `peer_id`. The returned stream yields every event the peer pushes for it.
    pub async fn subscribe(
        &mut self,
        peer_id: PeerId,
        selector: MonitorScopeSelector,
    ) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, PeerConnectionError> {
        let (events, stream) = mpsc::unbounded();
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Subscribe { peer_id, selector, events, sender }).await?;
        receiver.await??;
        Ok(stream)
    }

    pub async fn shutdown(mut self) -> Result<bool, PeerConnectionError> {
        let (sender, receiver) = oneshot::channel();
        self.sender.send(ClientCommand::Shutdown(sender)).await?;
        let result = receiver.await?;
        Ok(result)
    }
}

/// The mesh manager API over a connected [`Client`].
///
/// Every outgoing connection has its first path segment signed with the client identity, valid for
/// `max_token_lifetime`.
#[derive(Clone)]
pub struct MeshApi {
    client: Client,
    manager: PeerId,
    identity: Arc<ClientIdentity>,
    max_token_lifetime: Duration,
}

impl MeshApi {
    /// Dials the manager at `addr`, giving up after `dial_timeout`.
    pub async fn connect(
        mut client: Client,
        addr: Multiaddr,
        identity: Arc<ClientIdentity>,
        dial_timeout: Duration,
        max_token_lifetime: Duration,
    ) -> Result<Self, PeerConnectionError> {
        let manager = tokio::time::timeout(dial_timeout, client.dial(addr.clone()))
            .await
            .map_err(|_| PeerConnectionError::DialTimeout(addr.clone()))??;
        info!("Connected to the mesh manager {manager} at {addr}");
        Ok(Self { client, manager, identity, max_token_lifetime })
    }

    fn sign_path(&self, connection: &mut Connection) -> Result<(), PeerConnectionError> {
        let Some(segment) = connection.path.segments.first_mut() else {
            return Ok(());
        };
        let lifetime = TimeDelta::from_std(self.max_token_lifetime).unwrap_or(TimeDelta::MAX);
        let expires = Utc::now().checked_add_signed(lifetime).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        segment.token = self.identity.issue_token(&segment.name, &segment.id, expires)?;
        segment.expires = expires;
        Ok(())
    }

    async fn call(&self, ctx: &CallContext, request: MeshRequest) -> Result<MeshResponse, ClientError> {
        let mut client = self.client.clone();
        let response = ctx.run(client.send_request(self.manager, request)).await??;
        Ok(response)
    }
}

impl From<PeerConnectionError> for ClientError {
    fn from(e: PeerConnectionError) -> Self {
        match e {
            PeerConnectionError::Remote(e) => ClientError::Rejected(e.to_string()),
            e => ClientError::Transport(e.to_string()),
        }
    }
}

impl NetworkServiceClient for MeshApi {
    async fn request(&self, ctx: &CallContext, mut request: NetworkServiceRequest) -> Result<Connection, ClientError> {
        self.sign_path(&mut request.connection)?;
        debug!("{ctx} Requesting {}", request.connection);
        match self.call(ctx, MeshRequest::Request(request)).await? {
            MeshResponse::Connection(Ok(connection)) => Ok(connection),
            MeshResponse::Connection(Err(e)) | MeshResponse::Error(e) => Err(ClientError::Rejected(e.to_string())),
            other => Err(PeerConnectionError::UnexpectedResponse(other.to_string()).into()),
        }
    }

    async fn close(&self, ctx: &CallContext, connection: &Connection) -> Result<(), ClientError> {
        debug!("{ctx} Closing {}", connection.id);
        match self.call(ctx, MeshRequest::Close(connection.clone())).await? {
            MeshResponse::Closed(Ok(())) => Ok(()),
            MeshResponse::Closed(Err(e)) | MeshResponse::Error(e) => Err(ClientError::Rejected(e.to_string())),
            other => Err(PeerConnectionError::UnexpectedResponse(other.to_string()).into()),
        }
    }
}

impl MonitorConnectionClient for MeshApi {
    type Stream = mpsc::UnboundedReceiver<ConnectionEvent>;

    async fn monitor_connections(
        &self,
        ctx: &CallContext,
        selector: MonitorScopeSelector,
    ) -> Result<Self::Stream, MonitorError> {
        let mut client = self.client.clone();
        match ctx.run(client.subscribe(self.manager, selector)).await {
            Ok(result) => result.map_err(|e| MonitorError::subscribe(e.to_string())),
            Err(_) => Err(MonitorError::Cancelled),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identity::verify_token;
    use libnsc::connection::PathSegment;

    #[tokio::test]
    async fn dial_needs_a_peer_id() {
        let (mut client, _event_loop) = new_network(Keypair::generate_ed25519()).unwrap();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/5001".parse().unwrap();
        let err = client.dial(addr).await.unwrap_err();
        assert!(matches!(err, PeerConnectionError::MissingPeerId));
    }

    #[tokio::test]
    async fn unreachable_manager_times_out_or_fails() {
        env_logger::try_init().ok();
        let (client, event_loop) = new_network(Keypair::generate_ed25519()).unwrap();
        tokio::spawn(event_loop.run());
        let manager = Keypair::generate_ed25519().public().to_peer_id();
        // Nothing listens on port 9 of the loopback interface.
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/9/p2p/{manager}").parse().unwrap();
        let identity = Arc::new(ClientIdentity::random());
        let result =
            MeshApi::connect(client.clone(), addr, identity, Duration::from_secs(2), Duration::from_secs(600)).await;
        assert!(matches!(result, Err(PeerConnectionError::DialError(_) | PeerConnectionError::DialTimeout(_))));
        assert!(client.shutdown().await.unwrap());
    }

    #[tokio::test]
    async fn first_segment_is_signed() {
        let (client, _event_loop) = new_network(Keypair::generate_ed25519()).unwrap();
        let identity = Arc::new(ClientIdentity::random_with_name("nsc"));
        let api = MeshApi {
            client,
            manager: identity.peer_id(),
            identity: identity.clone(),
            max_token_lifetime: Duration::from_secs(600),
        };
        let mut conn = Connection::candidate("nsc-0", "svc", Default::default());
        conn.path.segments.push(PathSegment::new("nsc", "nsc-0"));
        api.sign_path(&mut conn).unwrap();
        let segment = &conn.path.segments[0];
        assert!(segment.expires > Utc::now() + TimeDelta::minutes(9));
        assert!(verify_token(&identity.keypair().public(), "nsc", "nsc-0", segment.expires, &segment.token));
    }

    #[test]
    fn remote_errors_become_rejections() {
        let err: ClientError = PeerConnectionError::Remote(crate::errors::RemoteServerError::ServerShuttingDown).into();
        assert!(matches!(err, ClientError::Rejected(_)));
        let err: ClientError = PeerConnectionError::ConnectionClosed.into();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
