use crate::mechanism::MAX_INTERFACE_NAME_LEN;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed network service descriptor '{text}': {reason}")]
    MalformedUrl { text: String, reason: String },
    #[error("Unknown mechanism '{0}' in network service descriptor. Supported: kernel, device")]
    UnknownMechanism(String),
}

impl ParseError {
    pub fn malformed(text: &str, reason: impl ToString) -> Self {
        ParseError::MalformedUrl { text: text.to_string(), reason: reason.to_string() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("No mechanism specified, and no default mechanism is configured")]
    NoMechanism,
    #[error("Invalid mechanism configuration. {0}")]
    InvalidMechanismConfig(#[from] ValidationError),
}

/// A violation of the descriptor invariants, checked after defaults have been merged in.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The network service name cannot be empty")]
    EmptyNetworkService,
    #[error("No mechanism is set on the descriptor")]
    MissingMechanism,
    #[error("A kernel mechanism needs exactly one interface name, but {0} path segments were given")]
    KernelInterfaceCount(usize),
    #[error("Interface name '{0}' exceeds {MAX_INTERFACE_NAME_LEN} characters")]
    InterfaceNameTooLong(String),
    #[error("A device mechanism does not take path segments, but {0} were given")]
    DevicePathNotAllowed(usize),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("Malformed label '{0}'. Labels are given as key=value pairs")]
    MalformedLabel(String),
}
