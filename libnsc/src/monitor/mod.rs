//! Watching the server-pushed connection event stream.
//!
//! A [`ConnectionMonitor`] subscribes once per descriptor. A background receiver owns the only write handle to the
//! snapshot cache; the request loop reads the latest snapshot through [`ConnectionMonitor::lookup`].

mod error;

pub use error::MonitorError;

use crate::connection::{Connection, ConnectionEvent, ConnectionEventType, ConnectionState, MonitorScopeSelector};
use crate::context::{CallContext, Interrupted};
use crate::mechanism::MechanismType;
use futures::{Stream, StreamExt};
use log::*;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The server-push half of the mesh manager API.
pub trait MonitorConnectionClient: Send + Sync {
    type Stream: Stream<Item = ConnectionEvent> + Send + Unpin + 'static;

    fn monitor_connections(
        &self,
        ctx: &CallContext,
        selector: MonitorScopeSelector,
    ) -> impl Future<Output = Result<Self::Stream, MonitorError>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Unsubscribed,
    Subscribed,
    Receiving,
    StreamClosed,
}

impl Display for MonitorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Unsubscribed => write!(f, "Unsubscribed"),
            MonitorState::Subscribed => write!(f, "Subscribed"),
            MonitorState::Receiving => write!(f, "Receiving"),
            MonitorState::StreamClosed => write!(f, "StreamClosed"),
        }
    }
}

/// The cached connections, and the number of events applied to them so far.
#[derive(Default)]
struct Snapshots {
    revision: u64,
    connections: BTreeMap<String, Connection>,
}

pub struct ConnectionMonitor {
    id: String,
    snapshots: watch::Receiver<Snapshots>,
    state: watch::Receiver<MonitorState>,
    receiver: Option<JoinHandle<()>>,
}

impl ConnectionMonitor {
    /// A monitor that never sees any events. Every lookup misses.
    pub fn unsubscribed(id: impl Into<String>) -> Self {
        let (_, snapshots) = watch::channel(Snapshots::default());
        let (_, state) = watch::channel(MonitorState::Unsubscribed);
        Self { id: id.into(), snapshots, state, receiver: None }
    }

    /// Opens an event stream scoped to connection `id`, and waits up to `timeout` for the first event.
    ///
    /// The first event is applied to the cache before this returns, leaving the monitor `Subscribed`. The remaining
    /// events are applied by a background task, which moves the monitor to `Receiving` and stops when the stream ends
    /// or `ctx` is cancelled.
    pub async fn subscribe<M: MonitorConnectionClient>(
        ctx: &CallContext,
        client: &M,
        id: &str,
        timeout: Duration,
    ) -> Result<Self, MonitorError> {
        let selector = MonitorScopeSelector::for_connection(id);
        let first = ctx
            .timeout(timeout, async {
                let mut stream = client.monitor_connections(ctx, selector).await?;
                let first = stream.next().await;
                Ok::<_, MonitorError>((stream, first))
            })
            .await;
        let (stream, first) = match first {
            Ok(result) => result?,
            Err(Interrupted::Timeout) => return Err(MonitorError::Timeout(timeout)),
            Err(Interrupted::Cancelled) => return Err(MonitorError::Cancelled),
        };
        let first = first.ok_or(MonitorError::StreamClosedEarly)?;

        let mut cache = Snapshots::default();
        apply_event(&mut cache, first);
        let (snapshot_tx, snapshots) = watch::channel(cache);
        let (state_tx, state) = watch::channel(MonitorState::Subscribed);
        debug!("{ctx} Monitor subscribed");
        let receiver = tokio::spawn(receive_events(ctx.clone(), stream, snapshot_tx, state_tx));
        Ok(Self { id: id.to_string(), snapshots, state, receiver: Some(receiver) })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Counts the events applied to the cache. It grows by one for every event, so a caller can tell whether anything
    /// arrived since it last looked.
    pub fn revision(&self) -> u64 {
        self.snapshots.borrow().revision
    }

    /// Returns the most recent snapshot of the connection whose first path segment is `id` and whose mechanism is
    /// `mechanism`. The snapshot's path index is rewound to 0 and its id pinned to `id`.
    pub fn lookup(&self, id: &str, mechanism: MechanismType) -> Option<Connection> {
        let snapshots = self.snapshots.borrow();
        snapshots
            .connections
            .values()
            .find(|conn| conn.first_segment_id() == Some(id) && conn.mechanism_type() == Some(mechanism))
            .map(|conn| {
                let mut conn = conn.clone();
                conn.normalize_for(id);
                conn
            })
    }

    /// Waits for the receiver task to finish.
    pub async fn join(mut self) {
        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                warn!("Monitor receiver for {} ended abnormally: {e}", self.id);
            }
        }
    }
}

fn apply_event(cache: &mut Snapshots, event: ConnectionEvent) {
    let is_delete = event.event_type == ConnectionEventType::Delete;
    cache.revision += 1;
    for (key, mut conn) in event.connections {
        if is_delete {
            conn.state = ConnectionState::Down;
        }
        cache.connections.insert(key, conn);
    }
}

async fn receive_events<S>(
    ctx: CallContext,
    mut stream: S,
    snapshots: watch::Sender<Snapshots>,
    state: watch::Sender<MonitorState>,
) where
    S: Stream<Item = ConnectionEvent> + Unpin,
{
    loop {
        match ctx.run(stream.next()).await {
            Ok(Some(event)) => {
                trace!("{ctx} Monitor event {:?} for {} connection(s)", event.event_type, event.connections.len());
                snapshots.send_modify(|cache| apply_event(cache, event));
                state.send_if_modified(|s| std::mem::replace(s, MonitorState::Receiving) != MonitorState::Receiving);
            }
            Ok(None) => {
                debug!("{ctx} Monitor stream closed");
                break;
            }
            Err(_) => {
                trace!("{ctx} Monitor receiver cancelled");
                break;
            }
        }
    }
    state.send_replace(MonitorState::StreamClosed);
}
