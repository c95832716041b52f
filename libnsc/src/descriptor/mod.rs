//! Network service descriptors: the compact, URL-shaped way a user asks for a network service.
//!
//! A descriptor is created by [`parser::parse`], completed once by [`ServiceDescriptor::merge`] and is immutable
//! thereafter.

mod defaults;
pub mod error;
mod parser;

pub use defaults::{parse_label, ClientDefaults};
pub use error::{LabelError, MergeError, ParseError, ValidationError};
pub use parser::parse;

use crate::mechanism::{MechanismType, MAX_INTERFACE_NAME_LEN};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use url::form_urlencoded;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub network_service: String,
    pub mechanism: Option<MechanismType>,
    pub path_segments: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// The interface name requested by a kernel descriptor.
    pub fn interface_name(&self) -> Option<&str> {
        match self.mechanism {
            Some(MechanismType::Kernel) => self.path_segments.first().map(String::as_str),
            _ => None,
        }
    }

    /// Checks the descriptor invariants. Only meaningful once defaults have been merged in.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.network_service.is_empty() {
            return Err(ValidationError::EmptyNetworkService);
        }
        match self.mechanism {
            None => Err(ValidationError::MissingMechanism),
            Some(MechanismType::Kernel) => match self.path_segments.as_slice() {
                [name] if name.chars().count() > MAX_INTERFACE_NAME_LEN => {
                    Err(ValidationError::InterfaceNameTooLong(name.clone()))
                }
                [_] => Ok(()),
                segments => Err(ValidationError::KernelInterfaceCount(segments.len())),
            },
            Some(MechanismType::Device) if !self.path_segments.is_empty() => {
                Err(ValidationError::DevicePathNotAllowed(self.path_segments.len()))
            }
            Some(MechanismType::Device) => Ok(()),
        }
    }
}

impl FromStr for ServiceDescriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Display for ServiceDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(mechanism) = self.mechanism {
            write!(f, "{mechanism}://")?;
        }
        write!(f, "{}", self.network_service)?;
        for segment in &self.path_segments {
            write!(f, "/{segment}")?;
        }
        if !self.labels.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new()).extend_pairs(self.labels.iter()).finish();
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_sorts_labels() {
        let desc: ServiceDescriptor = "kernel://svc/if0?zone=b&app=web".parse().unwrap();
        assert_eq!(desc.to_string(), "kernel://svc/if0?app=web&zone=b");
    }

    #[test]
    fn reparsing_the_display_form_gives_the_same_descriptor() {
        let inputs = [
            "kernel://my-service/nsmKernel?a=20",
            "my-service/nsmKernel",
            "my-service?B=40",
            "vfio://second-service?sriovToken=intel/10G",
            "kernel://svc@cluster.local/if0?x=a b",
        ];
        for text in inputs {
            let desc: ServiceDescriptor = text.parse().unwrap();
            let again: ServiceDescriptor = desc.to_string().parse().unwrap();
            assert_eq!(desc, again, "{text} did not survive a display round trip");
        }
    }

    #[test]
    fn interface_name_only_for_kernel() {
        let desc: ServiceDescriptor = "kernel://svc/nsm0".parse().unwrap();
        assert_eq!(desc.interface_name(), Some("nsm0"));
        let desc: ServiceDescriptor = "svc/nsm0".parse().unwrap();
        assert_eq!(desc.interface_name(), None);
    }

    #[test]
    fn empty_service_is_invalid() {
        let desc = ServiceDescriptor { mechanism: Some(MechanismType::Device), ..Default::default() };
        assert_eq!(desc.validate(), Err(ValidationError::EmptyNetworkService));
    }
}
