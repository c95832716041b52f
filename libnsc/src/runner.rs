//! Runs one request/heal task per descriptor and hands their connections to the [`Lifecycle`] for teardown.

use crate::client::{ClientChain, MechanismClient, NetworkServiceClient};
use crate::context::CallContext;
use crate::descriptor::ServiceDescriptor;
use crate::lifecycle::{CleanupReport, ConnectionSlot, Lifecycle, PendingCleanup};
use crate::liveness::LivenessProber;
use crate::monitor::{ConnectionMonitor, MonitorConnectionClient};
use crate::request_loop::{candidate_connection, connection_id, LoopError, LoopSettings, RequestLoop};
use futures::channel::oneshot;
use futures::future::join_all;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct RunnerSettings {
    /// Prefix of every connection id.
    pub client_name: String,
    pub loop_settings: LoopSettings,
    /// How long to wait for the first monitor event after subscribing.
    pub monitor_timeout: Duration,
    /// How often an established connection is checked for a `Down` report.
    pub heal_interval: Duration,
    /// Budget for closing every connection at shutdown.
    pub teardown_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            client_name: "nsc".to_string(),
            loop_settings: LoopSettings::default(),
            monitor_timeout: Duration::from_secs(15),
            heal_interval: Duration::from_secs(1),
            teardown_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub descriptors: usize,
    /// Descriptors whose connection was established at least once.
    pub established: usize,
    pub cleanup: CleanupReport,
}

impl RunSummary {
    pub fn any_established(&self) -> bool {
        self.established > 0
    }
}

pub struct ServiceRunner<C, M, P> {
    client: C,
    monitor_client: M,
    prober: Option<P>,
    settings: RunnerSettings,
    lifecycle: Lifecycle,
}

impl<C, M, P> ServiceRunner<C, M, P>
where
    C: NetworkServiceClient + Clone + 'static,
    M: MonitorConnectionClient + Clone + 'static,
    P: LivenessProber + Clone + 'static,
{
    pub fn new(client: C, monitor_client: M, prober: Option<P>, settings: RunnerSettings) -> Self {
        Self { client, monitor_client, prober, settings, lifecycle: Lifecycle::new() }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Serves every descriptor until `ctx` is cancelled, then tears everything down.
    ///
    /// Descriptors are keyed by their position in the configuration, which fixes their connection ids. If no
    /// descriptor reaches an established connection, this returns as soon as every task has given up.
    pub async fn run(&self, ctx: &CallContext, descriptors: Vec<(usize, ServiceDescriptor)>) -> RunSummary {
        let tasks_ctx = ctx.child();
        let mut handles = Vec::with_capacity(descriptors.len());
        let mut notifications = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors {
            let (established_tx, established_rx) = oneshot::channel();
            let task = DescriptorTask {
                id: connection_id(&self.settings.client_name, index),
                descriptor,
                client: self.client.clone(),
                monitor_client: self.monitor_client.clone(),
                prober: self.prober.clone(),
                settings: self.settings.clone(),
                lifecycle: self.lifecycle.clone(),
            };
            handles.push(tokio::spawn(task.serve(tasks_ctx.clone(), established_tx)));
            notifications.push(established_rx);
        }
        let mut summary = RunSummary { descriptors: handles.len(), ..Default::default() };
        summary.established = join_all(notifications).await.into_iter().filter(|r| matches!(r, Ok(true))).count();

        if summary.any_established() {
            info!("{ctx} {} of {} network service(s) established", summary.established, summary.descriptors);
            ctx.cancelled().await;
            info!("{ctx} Shutting down");
        } else {
            error!("{ctx} None of the {} network service(s) could be established", summary.descriptors);
        }
        tasks_ctx.cancel();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("{ctx} A network service task ended abnormally: {e}");
            }
        }
        let teardown = CallContext::detached().with_field("phase", "teardown");
        summary.cleanup = self.lifecycle.cleanup(&teardown, self.settings.teardown_timeout).await;
        summary
    }
}

struct DescriptorTask<C, M, P> {
    id: String,
    descriptor: ServiceDescriptor,
    client: C,
    monitor_client: M,
    prober: Option<P>,
    settings: RunnerSettings,
    lifecycle: Lifecycle,
}

impl<C, M, P> DescriptorTask<C, M, P>
where
    C: NetworkServiceClient + Clone + 'static,
    M: MonitorConnectionClient,
    P: LivenessProber,
{
    async fn serve(self, ctx: CallContext, established: oneshot::Sender<bool>) {
        let ctx = ctx.with_field("service", &self.descriptor.network_service).with_field("id", &self.id);
        let Some(mechanism) = self.descriptor.mechanism else {
            error!("{ctx} Descriptor {} has no mechanism", self.descriptor);
            let _ = established.send(false);
            return;
        };
        let monitor =
            match ConnectionMonitor::subscribe(&ctx, &self.monitor_client, &self.id, self.settings.monitor_timeout).await {
                Ok(monitor) => monitor,
                Err(e) => {
                    error!("{ctx} {}", LoopError::from(e));
                    let _ = established.send(false);
                    return;
                }
            };
        let chain = ClientChain::new(MechanismClient::select(mechanism, &self.descriptor.path_segments), self.client);
        let settings = &self.settings.loop_settings;
        let request_loop = RequestLoop::new(&chain, &monitor, self.prober.as_ref(), settings, mechanism);
        let candidate = candidate_connection(&self.settings.client_name, &self.id, &self.descriptor);

        // Reports up to this revision were taken into account by the latest request.
        let mut handled_revision = monitor.revision();
        let slot: ConnectionSlot = match request_loop.run(&ctx, &candidate).await {
            Ok(connection) => Arc::new(RwLock::new(connection)),
            Err(LoopError::Cancelled) => {
                debug!("{ctx} Cancelled before the connection was established");
                let _ = established.send(false);
                return;
            }
            Err(e) => {
                error!("{ctx} {e}");
                let _ = established.send(false);
                return;
            }
        };
        self.lifecycle.register(PendingCleanup::close_with(chain.clone(), Arc::clone(&slot))).await;
        let _ = established.send(true);

        while ctx.sleep(self.settings.heal_interval).await {
            if monitor.revision() <= handled_revision {
                continue;
            }
            let reported_down = monitor.lookup(&self.id, mechanism).is_some_and(|snapshot| snapshot.is_down());
            if !reported_down {
                continue;
            }
            info!("{ctx} Healing connection");
            let revision = monitor.revision();
            match request_loop.run(&ctx, &candidate).await {
                Ok(connection) => {
                    *slot.write().await = connection;
                    handled_revision = revision;
                }
                Err(LoopError::Cancelled) => break,
                Err(e) => warn!("{ctx} Heal attempt failed. Will try again in {:?}. {e}", self.settings.heal_interval),
            }
        }
        drop(request_loop);
        monitor.join().await;
    }
}
