use crate::behaviour::ConnectionBehaviorEvent;
use crate::errors::{PeerConnectionError, RemoteServerError};
use crate::network_client::PeerConnection;
use crate::{ClientCommand, MeshRequest, MeshResponse};
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use libnsc::connection::ConnectionEvent;
use libp2p::request_response::{self, Message, OutboundRequestId, ResponseChannel};
use libp2p::swarm::SwarmEvent;
use libp2p::PeerId;
use log::*;
use std::collections::HashMap;

enum PendingRequest {
    Call(oneshot::Sender<Result<MeshResponse, PeerConnectionError>>),
    Subscribe { subscription_id: u64, sender: oneshot::Sender<Result<(), PeerConnectionError>> },
}

struct Subscription {
    peer: PeerId,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Drives the swarm. Commands arrive from [`crate::Client`]; events pushed by the mesh manager on a monitor
/// subscription are forwarded to that subscription's stream.
///
/// A subscription's stream ends when the connection to the manager closes, or when the loop shuts down.
pub struct EventLoop {
    swarm: PeerConnection,
    command_receiver: mpsc::Receiver<ClientCommand>,
    pending_dials: HashMap<PeerId, oneshot::Sender<Result<(), PeerConnectionError>>>,
    pending_requests: HashMap<OutboundRequestId, PendingRequest>,
    subscriptions: HashMap<u64, Subscription>,
    next_subscription: u64,
}

impl EventLoop {
    pub fn new(swarm: PeerConnection, command_receiver: mpsc::Receiver<ClientCommand>) -> Self {
        Self {
            swarm,
            command_receiver,
            pending_dials: HashMap::new(),
            pending_requests: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription: 1,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_event(event),
                command = self.command_receiver.next() => match command {
                    Some(ClientCommand::Shutdown(sender)) => {
                        self.shutdown();
                        let _ = sender.send(true);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    // Every client handle is gone.
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        debug!("Network event loop has stopped");
    }

    fn shutdown(&mut self) {
        info!("Shutting down the network event loop");
        self.subscriptions.clear();
        self.pending_requests.clear();
        self.pending_dials.clear();
        let peers = self.swarm.connected_peers().copied().collect::<Vec<_>>();
        for peer in peers {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<ConnectionBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(ConnectionBehaviorEvent::Json(event)) => self.handle_json_event(event),
            SwarmEvent::Behaviour(ConnectionBehaviorEvent::Identify(event)) => {
                trace!("Identify event: {event:?}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!("Connection established with {peer_id} at {}", endpoint.get_remote_address());
                if let Some(sender) = self.pending_dials.remove(&peer_id) {
                    let _ = sender.send(Ok(()));
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id: Some(peer_id), error, .. } => {
                warn!("Could not connect to {peer_id}: {error}");
                if let Some(sender) = self.pending_dials.remove(&peer_id) {
                    let _ = sender.send(Err(error.into()));
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established: 0, cause, .. } => {
                info!("Connection to {peer_id} closed. Cause: {cause:?}");
                let before = self.subscriptions.len();
                self.subscriptions.retain(|_, sub| sub.peer != peer_id);
                let dropped = before - self.subscriptions.len();
                if dropped > 0 {
                    warn!("Ended {dropped} monitor subscription(s) on {peer_id}");
                }
            }
            other => trace!("Unhandled swarm event: {other:?}"),
        }
    }

    fn handle_json_event(&mut self, event: request_response::Event<MeshRequest, MeshResponse>) {
        match event {
            request_response::Event::Message { peer, message: Message::Request { request, channel, .. }, .. } => {
                self.handle_inbound_request(peer, request, channel);
            }
            request_response::Event::Message { message: Message::Response { request_id, response }, .. } => {
                self.complete_request(request_id, response);
            }
            request_response::Event::OutboundFailure { peer, request_id, error, .. } => {
                warn!("Request {request_id} to {peer} failed: {error}");
                self.fail_request(request_id, PeerConnectionError::OutboundFailure(error.to_string()));
            }
            request_response::Event::InboundFailure { peer, request_id, error, .. } => {
                warn!("Inbound request {request_id} from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { peer, request_id, .. } => {
                trace!("Response to {request_id} sent to {peer}");
            }
        }
    }

    fn handle_inbound_request(&mut self, peer: PeerId, request: MeshRequest, channel: ResponseChannel<MeshResponse>) {
        let response = match request {
            MeshRequest::ConnectionEvent { subscription_id, event } => self.forward_event(peer, subscription_id, event),
            other => {
                debug!("{peer} sent an unsupported request: {other}");
                MeshResponse::Error(RemoteServerError::Unsupported)
            }
        };
        if self.swarm.behaviour_mut().json.send_response(channel, response).is_err() {
            warn!("Could not respond to {peer}. The connection has probably closed");
        }
    }

    fn forward_event(&mut self, peer: PeerId, subscription_id: u64, event: ConnectionEvent) -> MeshResponse {
        let Some(sub) = self.subscriptions.get(&subscription_id).filter(|s| s.peer == peer) else {
            debug!("{peer} pushed an event for unknown subscription #{subscription_id}");
            return MeshResponse::Error(RemoteServerError::UnknownSubscription(subscription_id));
        };
        trace!("Subscription #{subscription_id}: {:?} for {} connection(s)", event.event_type, event.connections.len());
        if sub.events.unbounded_send(event).is_err() {
            debug!("Subscription #{subscription_id} has no listener any more. Dropping it");
            self.subscriptions.remove(&subscription_id);
            return MeshResponse::Error(RemoteServerError::UnknownSubscription(subscription_id));
        }
        MeshResponse::EventAck
    }

    fn complete_request(&mut self, request_id: OutboundRequestId, response: MeshResponse) {
        match self.pending_requests.remove(&request_id) {
            Some(PendingRequest::Call(sender)) => {
                let _ = sender.send(Ok(response));
            }
            Some(PendingRequest::Subscribe { subscription_id, sender }) => {
                let result = match response {
                    MeshResponse::Subscribed(Ok(())) => Ok(()),
                    MeshResponse::Subscribed(Err(e)) | MeshResponse::Error(e) => Err(PeerConnectionError::Remote(e)),
                    other => Err(PeerConnectionError::UnexpectedResponse(other.to_string())),
                };
                if result.is_err() {
                    self.subscriptions.remove(&subscription_id);
                }
                let _ = sender.send(result);
            }
            None => warn!("Received a response for unknown request {request_id}"),
        }
    }

    fn fail_request(&mut self, request_id: OutboundRequestId, error: PeerConnectionError) {
        match self.pending_requests.remove(&request_id) {
            Some(PendingRequest::Call(sender)) => {
                let _ = sender.send(Err(error));
            }
            Some(PendingRequest::Subscribe { subscription_id, sender }) => {
                self.subscriptions.remove(&subscription_id);
                let _ = sender.send(Err(error));
            }
            None => {}
        }
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Dial { peer_id, peer_addr, sender } => {
                if self.swarm.is_connected(&peer_id) {
                    let _ = sender.send(Ok(()));
                    return;
                }
                debug!("Dialing {peer_addr}");
                match self.swarm.dial(peer_addr) {
                    Ok(()) => {
                        self.pending_dials.insert(peer_id, sender);
                    }
                    Err(e) => {
                        let _ = sender.send(Err(e.into()));
                    }
                }
            }
            ClientCommand::Request { peer_id, request, sender } => {
                trace!("Sending {request} to {peer_id}");
                let request_id = self.swarm.behaviour_mut().json.send_request(&peer_id, request);
                self.pending_requests.insert(request_id, PendingRequest::Call(sender));
            }
            ClientCommand::Subscribe { peer_id, selector, events, sender } => {
                let subscription_id = self.next_subscription;
                self.next_subscription += 1;
                // Registered before the request goes out: the manager may push the initial state before it answers.
                self.subscriptions.insert(subscription_id, Subscription { peer: peer_id, events });
                let request = MeshRequest::MonitorConnections { subscription_id, selector };
                let request_id = self.swarm.behaviour_mut().json.send_request(&peer_id, request);
                self.pending_requests.insert(request_id, PendingRequest::Subscribe { subscription_id, sender });
            }
            ClientCommand::Shutdown(sender) => {
                self.shutdown();
                let _ = sender.send(true);
            }
        }
    }
}
