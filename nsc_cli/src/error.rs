use libnsc::descriptor::LabelError;
use nsc_p2p::IdentityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid identity file: {0}")]
    InvalidConfig(#[from] serde_yml::Error),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Invalid duration '{0}'. Use a whole number followed by ms, s, m or h")]
    InvalidDuration(String),
    #[error("Invalid default labels. {0}")]
    InvalidLabels(#[from] LabelError),
    #[error("No mesh manager address. Set NSM_CONNECT_TO or pass --connect-to")]
    MissingConnectTo,
}
