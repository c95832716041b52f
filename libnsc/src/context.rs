//! The per-call context threaded through every operation: a cancellation token plus a set of structured fields that
//! prefix log lines.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("The operation was cancelled")]
    Cancelled,
    #[error("The operation timed out")]
    Timeout,
}

#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    fields: Arc<Vec<(&'static str, String)>>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel, fields: Arc::new(Vec::new()) }
    }

    /// A context that is never cancelled unless [`CallContext::cancel`] is called on it. Used for teardown, which must
    /// outlive the cancellation of the main context.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Returns a copy of this context carrying an extra log field.
    pub fn with_field(&self, key: &'static str, value: impl ToString) -> Self {
        let mut fields = self.fields.as_ref().clone();
        fields.retain(|(k, _)| *k != key);
        fields.push((key, value.to_string()));
        Self { cancel: self.cancel.clone(), fields: Arc::new(fields) }
    }

    /// A context that is cancelled with this one, but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), fields: Arc::clone(&self.fields) }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Runs `fut` to completion, unless the context is cancelled first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Runs `fut` to completion, unless the context is cancelled or `duration` elapses first.
    pub async fn timeout<F: Future>(&self, duration: Duration, fut: F) -> Result<F::Output, Interrupted> {
        match self.run(tokio::time::timeout(duration, fut)).await? {
            Ok(out) => Ok(out),
            Err(_) => Err(Interrupted::Timeout),
        }
    }

    /// Sleeps for `duration`. Returns `false` if the context was cancelled before the sleep completed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.run(tokio::time::sleep(duration)).await.is_ok()
    }
}

impl Display for CallContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields_render_as_prefix() {
        let ctx = CallContext::detached().with_field("service", "my-service").with_field("id", "nsc-0");
        assert_eq!(ctx.to_string(), "[service=my-service id=nsc-0]");
        let ctx = ctx.with_field("id", "nsc-1");
        assert_eq!(ctx.field("id"), Some("nsc-1"));
        assert_eq!(ctx.to_string(), "[service=my-service id=nsc-1]");
    }

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = CallContext::detached();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_cancel() {
        let ctx = CallContext::detached();
        let r = ctx.timeout(Duration::from_secs(1), tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(r, Err(Interrupted::Timeout));
        let r = ctx.timeout(Duration::from_secs(5), async { 42 }).await;
        assert_eq!(r, Ok(42));
        ctx.cancel();
        assert!(!ctx.sleep(Duration::from_secs(1)).await);
        let r = ctx.timeout(Duration::from_secs(5), async { 42 }).await;
        assert_eq!(r, Err(Interrupted::Cancelled));
    }
}
