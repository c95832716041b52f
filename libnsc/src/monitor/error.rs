use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Could not open the connection monitor stream. {0}")]
    Subscribe(String),
    #[error("No connection event arrived within {0:?} of subscribing")]
    Timeout(Duration),
    #[error("The monitor stream closed before the first event")]
    StreamClosedEarly,
    #[error("Subscription was cancelled")]
    Cancelled,
}

impl MonitorError {
    pub fn subscribe(msg: impl Into<String>) -> Self {
        MonitorError::Subscribe(msg.into())
    }
}
