//! Ordered teardown of every connection the client established.

use crate::client::{ClientError, NetworkServiceClient};
use crate::connection::Connection;
use crate::context::CallContext;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// The latest state of one established connection. Healing replaces the value in place, so the registered cleanup
/// always closes the current connection.
pub type ConnectionSlot = Arc<RwLock<Connection>>;

type CleanupAction = Box<dyn FnOnce(CallContext, Connection) -> BoxFuture<'static, Result<(), ClientError>> + Send>;

pub struct PendingCleanup {
    slot: ConnectionSlot,
    action: CleanupAction,
}

impl PendingCleanup {
    pub fn new<F, Fut>(slot: ConnectionSlot, action: F) -> Self
    where
        F: FnOnce(CallContext, Connection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let action: CleanupAction = Box::new(move |ctx, conn| action(ctx, conn).boxed());
        Self { slot, action }
    }

    /// A cleanup that closes the slot's connection through `client`, the chain that created it.
    pub fn close_with<C>(client: C, slot: ConnectionSlot) -> Self
    where
        C: NetworkServiceClient + 'static,
    {
        Self::new(slot, move |ctx, conn| async move { client.close(&ctx, &conn).await })
    }

    pub fn slot(&self) -> &ConnectionSlot {
        &self.slot
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub attempted: usize,
    pub failed: usize,
}

impl CleanupReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

/// The registry of pending cleanups, shared by all descriptor tasks.
#[derive(Clone, Default)]
pub struct Lifecycle {
    pending: Arc<Mutex<Vec<PendingCleanup>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, cleanup: PendingCleanup) {
        self.pending.lock().await.push(cleanup);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Runs every registered cleanup once, in registration order, all within `deadline`.
    ///
    /// A failing or timed-out cleanup is logged and counted; the rest still run. The registry is empty afterwards, so
    /// a second call does nothing.
    pub async fn cleanup(&self, ctx: &CallContext, deadline: Duration) -> CleanupReport {
        let entries = std::mem::take(&mut *self.pending.lock().await);
        let deadline = Instant::now() + deadline;
        let mut report = CleanupReport::default();
        for PendingCleanup { slot, action } in entries {
            report.attempted += 1;
            let connection = slot.read().await.clone();
            let id = connection.id.clone();
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = match ctx.timeout(remaining, action(ctx.clone(), connection)).await {
                Ok(result) => result,
                Err(e) => Err(ClientError::from(e)),
            };
            match result {
                Ok(()) => debug!("{ctx} Closed connection {id}"),
                Err(e) => {
                    report.failed += 1;
                    warn!("{ctx} Failed to close connection {id}: {e}");
                }
            }
        }
        info!("{ctx} Teardown closed {} of {} connection(s)", report.succeeded(), report.attempted);
        report
    }
}
