//! In-memory stand-ins for the mesh manager, used by tests and for running the client without a manager.

use crate::client::{ClientError, NetworkServiceClient};
use crate::connection::{
    Connection, ConnectionEvent, ConnectionEventType, ConnectionState, MonitorScopeSelector, NetworkServiceRequest,
    PathSegment,
};
use crate::context::CallContext;
use crate::liveness::LivenessProber;
use crate::monitor::{MonitorConnectionClient, MonitorError};
use futures::channel::mpsc;
use log::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A fake mesh manager. Places every request on `endpoint-<n>`, and reports every change to the attached
/// [`DummyMonitor`].
#[derive(Clone, Default)]
pub struct DummyMeshClient {
    inner: Arc<DummyMeshState>,
}

#[derive(Default)]
struct DummyMeshState {
    requests: Mutex<Vec<NetworkServiceRequest>>,
    closed: Mutex<Vec<Connection>>,
    placements: AtomicUsize,
    failures_left: AtomicU32,
    reject_all: AtomicBool,
    fail_close: AtomicBool,
    unreported: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: std::sync::Mutex<Duration>,
    monitor: std::sync::OnceLock<DummyMonitor>,
}

impl DummyMeshClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections placed or closed by this client are published on `monitor`.
    pub fn with_monitor(self, monitor: DummyMonitor) -> Self {
        if self.inner.monitor.set(monitor).is_err() {
            warn!("DummyMeshClient already has a monitor attached");
        }
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        if let Ok(mut l) = self.inner.latency.lock() {
            *l = latency;
        }
        self
    }

    /// The next `count` requests fail.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn reject_all(&self, reject: bool) {
        self.inner.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.inner.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Placed connections are no longer published on the attached monitor.
    pub fn stop_reporting(&self, stop: bool) {
        self.inner.unreported.store(stop, Ordering::SeqCst);
    }

    pub async fn requests(&self) -> Vec<NetworkServiceRequest> {
        self.inner.requests.lock().await.clone()
    }

    pub async fn closed(&self) -> Vec<Connection> {
        self.inner.closed.lock().await.clone()
    }

    /// The highest number of requests that were ever in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn latency(&self) -> Duration {
        self.inner.latency.lock().map(|l| *l).unwrap_or_default()
    }

    fn place(&self, request: NetworkServiceRequest) -> Connection {
        let n = self.inner.placements.fetch_add(1, Ordering::SeqCst);
        let mut connection = request.connection;
        if connection.mechanism.is_none() {
            connection.mechanism = request.mechanism_preferences.into_iter().next();
        }
        if connection.endpoint_name.is_empty() {
            connection.endpoint_name = format!("endpoint-{n}");
        }
        connection.state = ConnectionState::Up;
        if connection.path.segments.len() < 2 {
            connection.path.segments.push(PathSegment::new("nsmgr", format!("nsmgr-{n}")));
        }
        connection.path.index = 1;
        connection
    }
}

impl NetworkServiceClient for DummyMeshClient {
    async fn request(&self, _ctx: &CallContext, request: NetworkServiceRequest) -> Result<Connection, ClientError> {
        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.inner.requests.lock().await.push(request.clone());
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail_once =
            self.inner.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if fail_once || self.inner.reject_all.load(Ordering::SeqCst) {
            return Err(ClientError::Rejected("no endpoint available".into()));
        }
        let connection = self.place(request);
        let reported = !self.inner.unreported.load(Ordering::SeqCst);
        if let Some(monitor) = self.inner.monitor.get().filter(|_| reported) {
            monitor.publish(ConnectionEventType::Update, connection.clone()).await;
        }
        Ok(connection)
    }

    async fn close(&self, _ctx: &CallContext, connection: &Connection) -> Result<(), ClientError> {
        if self.inner.fail_close.load(Ordering::SeqCst) {
            return Err(ClientError::transport("connection to the manager was lost"));
        }
        self.inner.closed.lock().await.push(connection.clone());
        if let Some(monitor) = self.inner.monitor.get() {
            monitor.publish(ConnectionEventType::Delete, connection.clone()).await;
        }
        Ok(())
    }
}

/// A fake monitor stream source. Every subscriber gets an initial state transfer of the known connections that match
/// its selector, then every published change that matches.
#[derive(Clone, Default)]
pub struct DummyMonitor {
    inner: Arc<DummyMonitorState>,
}

#[derive(Default)]
struct DummyMonitorState {
    connections: Mutex<BTreeMap<String, Connection>>,
    subscribers: Mutex<Vec<(MonitorScopeSelector, mpsc::UnboundedSender<ConnectionEvent>)>>,
    refuse: AtomicBool,
    silent: AtomicBool,
}

impl DummyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriptions fail outright.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Subscriptions succeed but never deliver an event.
    pub fn stay_silent(&self, silent: bool) {
        self.inner.silent.store(silent, Ordering::SeqCst);
    }

    /// Records the change and pushes it to every matching subscriber.
    pub async fn publish(&self, event_type: ConnectionEventType, connection: Connection) {
        {
            let mut connections = self.inner.connections.lock().await;
            if event_type == ConnectionEventType::Delete {
                connections.remove(&connection.id);
            } else {
                connections.insert(connection.id.clone(), connection.clone());
            }
        }
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|(selector, tx)| {
            if !selector.matches(&connection) {
                return !tx.is_closed();
            }
            tx.unbounded_send(ConnectionEvent::new(event_type, [connection.clone()])).is_ok()
        });
    }

    /// Marks a known connection as `Down`, as the mesh does when an endpoint dies.
    pub async fn set_down(&self, id: &str) {
        let connection = self.inner.connections.lock().await.get(id).cloned();
        match connection {
            Some(mut connection) => {
                connection.state = ConnectionState::Down;
                self.publish(ConnectionEventType::Update, connection).await;
            }
            None => warn!("DummyMonitor: no connection {id} to mark down"),
        }
    }

    /// Drops every subscriber, ending their streams.
    pub async fn disconnect_all(&self) {
        self.inner.subscribers.lock().await.clear();
    }
}

impl MonitorConnectionClient for DummyMonitor {
    type Stream = mpsc::UnboundedReceiver<ConnectionEvent>;

    async fn monitor_connections(
        &self,
        _ctx: &CallContext,
        selector: MonitorScopeSelector,
    ) -> Result<Self::Stream, MonitorError> {
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(MonitorError::subscribe("manager refused the subscription"));
        }
        let (tx, rx) = mpsc::unbounded();
        if !self.inner.silent.load(Ordering::SeqCst) {
            let connections = self.inner.connections.lock().await;
            let initial = connections.values().filter(|c| selector.matches(c)).cloned();
            let event = ConnectionEvent::new(ConnectionEventType::InitialStateTransfer, initial);
            tx.unbounded_send(event).map_err(|e| MonitorError::subscribe(e.to_string()))?;
        }
        self.inner.subscribers.lock().await.push((selector, tx));
        Ok(rx)
    }
}

/// A prober with a fixed answer.
#[derive(Clone, Default)]
pub struct StaticProber {
    alive: bool,
    probes: Arc<AtomicUsize>,
}

impl StaticProber {
    pub fn new(alive: bool) -> Self {
        Self { alive, probes: Arc::default() }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl LivenessProber for StaticProber {
    async fn check(&self, _ctx: &CallContext, _connection: &Connection) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.alive
    }
}
