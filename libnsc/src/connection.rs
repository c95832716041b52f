use crate::mechanism::{Mechanism, MechanismType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Up,
    Down,
    /// The client asks the mesh to discard the current placement and select a new endpoint.
    ReselectRequested,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Up => write!(f, "Up"),
            ConnectionState::Down => write!(f, "Down"),
            ConnectionState::ReselectRequested => write!(f, "ReselectRequested"),
        }
    }
}

/// Context negotiated by the mesh for a connection, such as addresses and routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub src_ip_addrs: Vec<String>,
    pub dst_ip_addrs: Vec<String>,
    pub extra: BTreeMap<String, String>,
}

impl ConnectionContext {
    pub fn is_empty(&self) -> bool {
        self.src_ip_addrs.is_empty() && self.dst_ip_addrs.is_empty() && self.extra.is_empty()
    }
}

/// One hop of a connection's path through the mesh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub name: String,
    pub id: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self { name: name.into(), id: id.into(), token: String::new(), expires: DateTime::<Utc>::UNIX_EPOCH }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Position of the current hop. Always 0 on the client side before a request is issued.
    pub index: u32,
    pub segments: Vec<PathSegment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Stable per-descriptor identity, unchanged across reselects.
    pub id: String,
    pub network_service: String,
    pub labels: BTreeMap<String, String>,
    /// Empty while the connection is unplaced or a reselect is pending.
    pub endpoint_name: String,
    pub mechanism: Option<Mechanism>,
    pub context: ConnectionContext,
    pub state: ConnectionState,
    pub path: Path,
}

impl Connection {
    /// A fresh, unplaced connection.
    pub fn candidate(id: impl Into<String>, network_service: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self { id: id.into(), network_service: network_service.into(), labels, ..Default::default() }
    }

    pub fn mechanism_type(&self) -> Option<MechanismType> {
        self.mechanism.as_ref().map(Mechanism::mechanism_type)
    }

    /// The id of the first path segment, i.e. the id the client assigned to this connection.
    pub fn first_segment_id(&self) -> Option<&str> {
        self.path.segments.first().map(|s| s.id.as_str())
    }

    pub fn is_down(&self) -> bool {
        self.state == ConnectionState::Down
    }

    /// Discards the failed placement so that the mesh selects a new endpoint, while the id and path are kept.
    pub fn request_reselect(&mut self) {
        self.mechanism = None;
        self.endpoint_name.clear();
        self.context = ConnectionContext::default();
        self.state = ConnectionState::ReselectRequested;
    }

    /// Rewinds the path to the client's own hop and pins the connection id.
    pub fn normalize_for(&mut self, id: &str) {
        self.path.index = 0;
        self.id = id.to_string();
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} [{}]", self.id, self.network_service, self.state)?;
        if !self.endpoint_name.is_empty() {
            write!(f, " @ {}", self.endpoint_name)?;
        }
        if let Some(mechanism) = &self.mechanism {
            write!(f, " via {mechanism}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceRequest {
    pub connection: Connection,
    pub mechanism_preferences: Vec<Mechanism>,
}

impl NetworkServiceRequest {
    pub fn new(connection: Connection) -> Self {
        Self { connection, mechanism_preferences: Vec::new() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventType {
    InitialStateTransfer,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub event_type: ConnectionEventType,
    pub connections: BTreeMap<String, Connection>,
}

impl ConnectionEvent {
    pub fn new(event_type: ConnectionEventType, connections: impl IntoIterator<Item = Connection>) -> Self {
        let connections = connections.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { event_type, connections }
    }
}

/// Restricts a monitor subscription to connections passing through the given path segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorScopeSelector {
    pub path_segments: Vec<PathSegment>,
}

impl MonitorScopeSelector {
    pub fn for_connection(id: &str) -> Self {
        Self { path_segments: vec![PathSegment::new("", id)] }
    }

    /// True if any hop of the connection's path matches a selector segment on id or name.
    pub fn matches(&self, connection: &Connection) -> bool {
        self.path_segments.iter().any(|sel| {
            connection.path.segments.iter().any(|seg| {
                (!sel.id.is_empty() && sel.id == seg.id) || (!sel.name.is_empty() && sel.name == seg.name)
            })
        })
    }
}
