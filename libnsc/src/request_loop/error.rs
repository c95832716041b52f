use crate::client::ClientError;
use crate::monitor::MonitorError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LoopError {
    #[error("The request loop was cancelled")]
    Cancelled,
    #[error("Gave up after {attempts} request attempt(s). Last error: {last}")]
    RetriesExhausted { attempts: u32, last: ClientError },
    #[error("Connection monitor failure. {0}")]
    Monitor(#[from] MonitorError),
}
