//! Out-of-band data-path checks, used to decide whether a connection the mesh reports as down is really gone.

use crate::connection::Connection;
use crate::context::CallContext;
use crate::mechanism::Mechanism;
use log::*;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

pub const SYSFS_NET: &str = "/sys/class/net";

pub trait LivenessProber: Send + Sync {
    /// Returns true if traffic can still flow over the connection's data path. Must not modify anything.
    fn check(&self, ctx: &CallContext, connection: &Connection) -> impl Future<Output = bool> + Send;
}

/// Runs `prober`, treating a timeout or cancellation as "not alive".
pub async fn probe_with_timeout<P: LivenessProber>(
    prober: &P,
    ctx: &CallContext,
    connection: &Connection,
    timeout: Duration,
) -> bool {
    match ctx.timeout(timeout, prober.check(ctx, connection)).await {
        Ok(alive) => alive,
        Err(e) => {
            debug!("{ctx} Liveness probe for {} did not complete: {e}", connection.id);
            false
        }
    }
}

/// Checks the data path through the local view of the mechanism.
///
/// * kernel: the interface's `operstate` under the sysfs root reads `up` or `unknown`.
/// * device: the device directory exists.
#[derive(Clone, Debug)]
pub struct DataPathProber {
    sysfs_root: PathBuf,
}

impl Default for DataPathProber {
    fn default() -> Self {
        Self::new(SYSFS_NET)
    }
}

impl DataPathProber {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self { sysfs_root: sysfs_root.into() }
    }
}

impl LivenessProber for DataPathProber {
    async fn check(&self, ctx: &CallContext, connection: &Connection) -> bool {
        match &connection.mechanism {
            Some(Mechanism::Kernel(params)) => {
                let Some(name) = params.interface_name.as_deref() else {
                    return false;
                };
                let path = self.sysfs_root.join(name).join("operstate");
                match tokio::fs::read_to_string(&path).await {
                    Ok(state) => matches!(state.trim(), "up" | "unknown"),
                    Err(e) => {
                        trace!("{ctx} Could not read {}: {e}", path.display());
                        false
                    }
                }
            }
            Some(Mechanism::Device(params)) => tokio::fs::try_exists(&params.device_dir).await.unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mechanism::{DeviceParameters, KernelParameters};
    use std::collections::BTreeMap;

    fn kernel_connection(name: &str) -> Connection {
        let mut conn = Connection::candidate("nsc-0", "svc", BTreeMap::new());
        let params = KernelParameters { interface_name: Some(name.into()), netns_url: None };
        conn.mechanism = Some(Mechanism::Kernel(params));
        conn
    }

    #[tokio::test]
    async fn kernel_operstate() {
        let root = tempfile::tempdir().unwrap();
        for (name, state) in [("nsm0", "up\n"), ("nsm1", "down\n"), ("nsm2", "unknown\n")] {
            std::fs::create_dir(root.path().join(name)).unwrap();
            std::fs::write(root.path().join(name).join("operstate"), state).unwrap();
        }
        let prober = DataPathProber::new(root.path());
        let ctx = CallContext::detached();
        assert!(prober.check(&ctx, &kernel_connection("nsm0")).await);
        assert!(!prober.check(&ctx, &kernel_connection("nsm1")).await);
        assert!(prober.check(&ctx, &kernel_connection("nsm2")).await);
        assert!(!prober.check(&ctx, &kernel_connection("nsm9")).await);
    }

    #[tokio::test]
    async fn device_directory() {
        let dir = tempfile::tempdir().unwrap();
        let prober = DataPathProber::default();
        let ctx = CallContext::detached();
        let mut conn = Connection::candidate("nsc-0", "svc", BTreeMap::new());
        conn.mechanism = Some(Mechanism::Device(DeviceParameters { device_dir: dir.path().into(), cgroup_dir: None }));
        assert!(prober.check(&ctx, &conn).await);
        conn.mechanism = Some(Mechanism::Device(DeviceParameters {
            device_dir: dir.path().join("missing"),
            cgroup_dir: None,
        }));
        assert!(!prober.check(&ctx, &conn).await);
        conn.mechanism = None;
        assert!(!prober.check(&ctx, &conn).await);
    }

    struct Hangs;

    impl LivenessProber for Hangs {
        async fn check(&self, _: &CallContext, _: &Connection) -> bool {
            futures::future::pending::<bool>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_alive() {
        let ctx = CallContext::detached();
        let alive = probe_with_timeout(&Hangs, &ctx, &kernel_connection("nsm0"), Duration::from_secs(1)).await;
        assert!(!alive);
    }
}
