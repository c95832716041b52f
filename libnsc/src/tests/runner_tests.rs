//! End-to-end runner scenarios: establishment, healing and teardown against the in-memory mesh.

use crate::connection::ConnectionState;
use crate::context::CallContext;
use crate::descriptor::{ClientDefaults, ServiceDescriptor};
use crate::dummy_impl::{DummyMeshClient, DummyMonitor, StaticProber};
use crate::mechanism::MechanismType;
use crate::request_loop::{LoopSettings, RetryPolicy};
use crate::runner::{RunnerSettings, ServiceRunner};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

fn descriptors(texts: &[&str]) -> Vec<(usize, ServiceDescriptor)> {
    let defaults = ClientDefaults::new(Some(MechanismType::Kernel), ClientDefaults::parse_labels("env=test").unwrap());
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let mut desc: ServiceDescriptor = text.parse().unwrap();
            desc.merge(&defaults).unwrap();
            (i, desc)
        })
        .collect()
}

fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        loop_settings: LoopSettings { retry: RetryPolicy::new(Duration::from_millis(10)), ..Default::default() },
        monitor_timeout: Duration::from_secs(1),
        heal_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was never met");
}

fn mesh() -> (DummyMeshClient, DummyMonitor) {
    env_logger::try_init().ok();
    let monitor = DummyMonitor::new();
    (DummyMeshClient::new().with_monitor(monitor.clone()), monitor)
}

#[tokio::test]
async fn identical_services_get_independent_connections() {
    let (client, monitor) = mesh();
    client.fail_next(1);
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), Some(StaticProber::new(true)), fast_settings());
    let ctx = CallContext::detached();
    let input = descriptors(&["kernel://my-service/nsm0?a=1", "kernel://my-service/nsm1?a=1"]);
    let (summary, _) = tokio::join!(runner.run(&ctx, input), async {
        eventually(|| async { runner.lifecycle().pending_count().await == 2 }).await;
        ctx.cancel();
    });

    assert_eq!(summary.descriptors, 2);
    assert_eq!(summary.established, 2);
    assert_eq!(summary.cleanup.attempted, 2);
    assert_eq!(summary.cleanup.failed, 0);
    let requests = client.requests().await;
    assert_eq!(requests.len(), 3, "one descriptor retried its failed first attempt");
    let ids: BTreeSet<_> = requests.iter().map(|r| r.connection.id.clone()).collect();
    assert_eq!(ids, BTreeSet::from(["nsc-0".to_string(), "nsc-1".to_string()]));
    let closed: BTreeSet<_> = client.closed().await.into_iter().map(|c| c.id).collect();
    assert_eq!(closed, ids);
}

#[tokio::test]
async fn only_established_connections_are_closed() {
    let (client, monitor) = mesh();
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), None::<StaticProber>, fast_settings());
    let ctx = CallContext::detached();
    let mut input = descriptors(&["kernel://good/nsm0", "kernel://broken/nsm1"]);
    input[1].1.mechanism = None;
    let (summary, _) = tokio::join!(runner.run(&ctx, input), async {
        eventually(|| async { runner.lifecycle().pending_count().await == 1 }).await;
        ctx.cancel();
    });

    assert_eq!(summary.established, 1);
    let closed = client.closed().await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].id, "nsc-0");
    assert!(client.requests().await.iter().all(|r| r.connection.id == "nsc-0"));
}

#[tokio::test]
async fn nothing_established_returns_without_cancellation() {
    let (client, monitor) = mesh();
    monitor.refuse_subscriptions(true);
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), None::<StaticProber>, fast_settings());
    let summary = runner.run(&CallContext::detached(), descriptors(&["kernel://svc/nsm0"])).await;
    assert!(!summary.any_established());
    assert_eq!(summary.cleanup.attempted, 0);
    assert!(client.requests().await.is_empty());
}

#[tokio::test]
async fn silent_monitor_fails_the_descriptor() {
    let (client, monitor) = mesh();
    monitor.stay_silent(true);
    let settings = RunnerSettings { monitor_timeout: Duration::from_millis(50), ..fast_settings() };
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), None::<StaticProber>, settings);
    let summary = runner.run(&CallContext::detached(), descriptors(&["kernel://svc/nsm0"])).await;
    assert_eq!(summary.established, 0);
}

#[tokio::test]
async fn dead_connection_is_healed_in_place() {
    let (client, monitor) = mesh();
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), Some(StaticProber::new(false)), fast_settings());
    let ctx = CallContext::detached();
    let (summary, _) = tokio::join!(runner.run(&ctx, descriptors(&["kernel://svc/nsm0"])), async {
        eventually(|| async { runner.lifecycle().pending_count().await == 1 }).await;
        monitor.set_down("nsc-0").await;
        eventually(|| async { client.requests().await.len() == 2 }).await;
        // Let the healed connection land in the cleanup slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
    });

    assert_eq!(summary.established, 1);
    let requests = client.requests().await;
    assert_eq!(requests[1].connection.id, "nsc-0");
    assert_eq!(requests[1].connection.state, ConnectionState::ReselectRequested);
    let closed = client.closed().await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].endpoint_name, "endpoint-1");
}

#[tokio::test]
async fn down_report_is_healed_once() {
    let (client, monitor) = mesh();
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), Some(StaticProber::new(false)), fast_settings());
    let ctx = CallContext::detached();
    let (summary, _) = tokio::join!(runner.run(&ctx, descriptors(&["kernel://svc/nsm0"])), async {
        eventually(|| async { runner.lifecycle().pending_count().await == 1 }).await;
        // The manager accepts the reselect but never reports the new placement, so the cache stays `Down`.
        client.stop_reporting(true);
        monitor.set_down("nsc-0").await;
        eventually(|| async { client.requests().await.len() == 2 }).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(client.requests().await.len(), 2);

        // A fresh report is handled again.
        monitor.set_down("nsc-0").await;
        eventually(|| async { client.requests().await.len() == 3 }).await;
        ctx.cancel();
    });
    assert_eq!(summary.established, 1);
    assert_eq!(client.requests().await.len(), 3);
}

#[tokio::test]
async fn teardown_failures_do_not_stop_teardown() {
    let (client, monitor) = mesh();
    let runner = ServiceRunner::new(client.clone(), monitor.clone(), None::<StaticProber>, fast_settings());
    let ctx = CallContext::detached();
    let input = descriptors(&["kernel://a/nsm0", "kernel://b/nsm1", "kernel://c/nsm2"]);
    let (summary, _) = tokio::join!(runner.run(&ctx, input), async {
        eventually(|| async { runner.lifecycle().pending_count().await == 3 }).await;
        client.fail_close(true);
        ctx.cancel();
    });
    assert_eq!(summary.established, 3);
    assert_eq!(summary.cleanup.attempted, 3);
    assert_eq!(summary.cleanup.failed, 3);
}
