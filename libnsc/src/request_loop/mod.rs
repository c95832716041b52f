//! The per-descriptor request/reselect loop.
//!
//! ```text
//!   Init ──► Requesting ──► Established
//!               ▲   │
//!               │   ▼
//!             RetryWait
//! ```
//!
//! Every iteration starts from the latest monitor snapshot. A connection the mesh reports as `Down` is probed; if its
//! data path is gone, the placement is discarded and a reselect is requested under the same id.

mod error;
mod retry;

pub use error::LoopError;
pub use retry::RetryPolicy;

use crate::client::{ClientError, NetworkServiceClient};
use crate::connection::{Connection, NetworkServiceRequest, PathSegment};
use crate::context::{CallContext, Interrupted};
use crate::descriptor::ServiceDescriptor;
use crate::liveness::{probe_with_timeout, LivenessProber};
use crate::mechanism::MechanismType;
use crate::monitor::ConnectionMonitor;
use log::*;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessCheck {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for LivenessCheck {
    fn default() -> Self {
        Self { interval: Duration::from_secs(1), timeout: Duration::from_secs(1) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// `None` disables probing: a `Down` snapshot is always reselected.
    pub liveness: Option<LivenessCheck>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(15), retry: RetryPolicy::default(), liveness: Some(LivenessCheck::default()) }
    }
}

/// The connection id for the descriptor at `index`. Assigned once and kept across reselects.
pub fn connection_id(client_name: &str, index: usize) -> String {
    format!("{client_name}-{index}")
}

/// An unplaced connection for `descriptor`, with the client's own hop as the first path segment.
pub fn candidate_connection(client_name: &str, id: &str, descriptor: &ServiceDescriptor) -> Connection {
    let mut connection = Connection::candidate(id, descriptor.network_service.clone(), descriptor.labels.clone());
    connection.path.segments.push(PathSegment::new(client_name, id));
    connection
}

pub struct RequestLoop<'a, C, P> {
    client: &'a C,
    monitor: &'a ConnectionMonitor,
    prober: Option<&'a P>,
    settings: &'a LoopSettings,
    mechanism: MechanismType,
}

impl<'a, C, P> RequestLoop<'a, C, P>
where
    C: NetworkServiceClient,
    P: LivenessProber,
{
    /// `prober` is only consulted when the settings enable liveness checks.
    pub fn new(
        client: &'a C,
        monitor: &'a ConnectionMonitor,
        prober: Option<&'a P>,
        settings: &'a LoopSettings,
        mechanism: MechanismType,
    ) -> Self {
        let prober = prober.filter(|_| settings.liveness.is_some());
        Self { client, monitor, prober, settings, mechanism }
    }

    /// Decides what to send for `candidate`, based on what the monitor last saw of the same id.
    pub async fn reconcile(&self, ctx: &CallContext, candidate: &Connection) -> Connection {
        let Some(mut snapshot) = self.monitor.lookup(&candidate.id, self.mechanism) else {
            return candidate.clone();
        };
        if !snapshot.is_down() {
            trace!("{ctx} Refreshing existing connection {snapshot}");
            return snapshot;
        }
        let alive = match (self.prober, self.settings.liveness) {
            (Some(prober), Some(check)) => probe_with_timeout(prober, ctx, &snapshot, check.timeout).await,
            _ => false,
        };
        if alive {
            debug!("{ctx} Connection {} is reported down, but its data path is alive", snapshot.id);
        } else {
            info!("{ctx} Connection {} is down. Requesting a new endpoint", snapshot.id);
            snapshot.request_reselect();
        }
        snapshot
    }

    /// Drives `candidate` to an established connection, retrying per the policy.
    ///
    /// At most one request is in flight at a time, and the context is checked before every attempt.
    pub async fn run(&self, ctx: &CallContext, candidate: &Connection) -> Result<Connection, LoopError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            if ctx.is_cancelled() {
                return Err(LoopError::Cancelled);
            }
            let connection = self.reconcile(ctx, candidate).await;
            attempts += 1;
            trace!("{ctx} Request attempt {attempts} for {connection}");
            let request = NetworkServiceRequest::new(connection);
            let last = match ctx.timeout(self.settings.request_timeout, self.client.request(ctx, request)).await {
                Ok(Ok(established)) => {
                    info!("{ctx} Connection established: {established}");
                    return Ok(established);
                }
                Ok(Err(e)) => e,
                Err(Interrupted::Timeout) => ClientError::Interrupted(Interrupted::Timeout),
                Err(Interrupted::Cancelled) => return Err(LoopError::Cancelled),
            };
            warn!("{ctx} Request attempt {attempts} failed: {last}");
            if self.settings.retry.is_exhausted(attempts, started.elapsed()) {
                return Err(LoopError::RetriesExhausted { attempts, last });
            }
            if !ctx.sleep(self.settings.retry.interval).await {
                return Err(LoopError::Cancelled);
            }
        }
    }
}
