use super::error::{LabelError, MergeError};
use super::ServiceDescriptor;
use crate::mechanism::MechanismType;
use std::collections::BTreeMap;

/// Process-wide fallbacks for fields a descriptor leaves unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientDefaults {
    pub mechanism: Option<MechanismType>,
    pub labels: BTreeMap<String, String>,
}

impl ClientDefaults {
    pub fn new(mechanism: Option<MechanismType>, labels: BTreeMap<String, String>) -> Self {
        Self { mechanism, labels }
    }

    /// Parses a comma separated list of `key=value` pairs. Whitespace around keys and values is trimmed and empty
    /// entries are skipped.
    pub fn parse_labels(text: &str) -> Result<BTreeMap<String, String>, LabelError> {
        Self::labels_from_pairs(text.split(','))
    }

    /// As [`ClientDefaults::parse_labels`], for labels that have already been split into `key=value` entries.
    pub fn labels_from_pairs<'a, I>(pairs: I) -> Result<BTreeMap<String, String>, LabelError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut labels = BTreeMap::new();
        for pair in pairs.into_iter().map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = parse_label(pair)?;
            labels.insert(key, value);
        }
        Ok(labels)
    }
}

/// Parses a single `key=value` label.
pub fn parse_label(pair: &str) -> Result<(String, String), LabelError> {
    let mut parts = pair.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(LabelError::MalformedLabel(pair.to_string())),
    }
}

impl ServiceDescriptor {
    /// Fills the blanks of this descriptor from `defaults` and validates the result.
    ///
    /// Values the descriptor already carries are never overridden. Merging is idempotent: merging the same defaults
    /// a second time leaves the descriptor unchanged.
    pub fn merge(&mut self, defaults: &ClientDefaults) -> Result<(), MergeError> {
        if self.mechanism.is_none() {
            self.mechanism = Some(defaults.mechanism.ok_or(MergeError::NoMechanism)?);
        }
        for (key, value) in &defaults.labels {
            self.labels.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptor::error::ValidationError;

    fn defaults(mechanism: Option<MechanismType>, labels: &str) -> ClientDefaults {
        ClientDefaults::new(mechanism, ClientDefaults::parse_labels(labels).unwrap())
    }

    #[test]
    fn labels_are_trimmed() {
        let labels = ClientDefaults::parse_labels(" app = web , env=prod,").unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["app"], "web");
        assert_eq!(labels["env"], "prod");
        assert!(ClientDefaults::parse_labels("").unwrap().is_empty());
    }

    #[test]
    fn malformed_labels() {
        assert_eq!(ClientDefaults::parse_labels("app"), Err(LabelError::MalformedLabel("app".into())));
        assert_eq!(ClientDefaults::parse_labels("a=b=c"), Err(LabelError::MalformedLabel("a=b=c".into())));
        assert_eq!(ClientDefaults::parse_labels("=x"), Err(LabelError::MalformedLabel("=x".into())));
    }

    #[test]
    fn defaults_fill_blanks_only() {
        let mut desc: ServiceDescriptor = "my-service/nsmKernel?app=db".parse().unwrap();
        desc.merge(&defaults(Some(MechanismType::Kernel), "app=web,env=prod")).unwrap();
        assert_eq!(desc.mechanism, Some(MechanismType::Kernel));
        assert_eq!(desc.labels["app"], "db");
        assert_eq!(desc.labels["env"], "prod");

        let mut desc: ServiceDescriptor = "kernel://svc/if0".parse().unwrap();
        desc.merge(&defaults(Some(MechanismType::Device), "")).unwrap();
        assert_eq!(desc.mechanism, Some(MechanismType::Kernel));
    }

    #[test]
    fn blank_descriptor_takes_every_default() {
        let mut desc = ServiceDescriptor { network_service: "svc".into(), ..Default::default() };
        desc.merge(&defaults(Some(MechanismType::Device), "env=prod")).unwrap();
        assert_eq!(desc.mechanism, Some(MechanismType::Device));
        assert_eq!(desc.labels, ClientDefaults::parse_labels("env=prod").unwrap());
    }

    #[test]
    fn merge_is_idempotent() {
        let d = defaults(Some(MechanismType::Kernel), "env=prod");
        let mut desc: ServiceDescriptor = "svc/if0?x=1".parse().unwrap();
        desc.merge(&d).unwrap();
        let once = desc.clone();
        desc.merge(&d).unwrap();
        assert_eq!(desc, once);
    }

    #[test]
    fn missing_mechanism() {
        let mut desc: ServiceDescriptor = "svc/if0".parse().unwrap();
        assert_eq!(desc.merge(&ClientDefaults::default()), Err(MergeError::NoMechanism));
    }

    #[test]
    fn kernel_needs_one_short_interface_name() {
        let d = defaults(Some(MechanismType::Kernel), "");
        let mut desc: ServiceDescriptor = "kernel://svc".parse().unwrap();
        assert_eq!(desc.merge(&d), Err(ValidationError::KernelInterfaceCount(0).into()));

        let mut desc: ServiceDescriptor = "kernel://svc/a/b".parse().unwrap();
        assert_eq!(desc.merge(&d), Err(ValidationError::KernelInterfaceCount(2).into()));

        let mut desc: ServiceDescriptor = "kernel://svc/abcdefghijklmnop".parse().unwrap();
        assert_eq!(desc.merge(&d), Err(ValidationError::InterfaceNameTooLong("abcdefghijklmnop".into()).into()));

        let mut desc: ServiceDescriptor = "kernel://svc/abcdefghijklmno".parse().unwrap();
        assert!(desc.merge(&d).is_ok());
    }

    #[test]
    fn device_takes_no_path() {
        let d = defaults(None, "");
        let mut desc: ServiceDescriptor = "device://svc/extra".parse().unwrap();
        assert_eq!(desc.merge(&d), Err(ValidationError::DevicePathNotAllowed(1).into()));

        let mut desc: ServiceDescriptor = "vfio://svc?sriovToken=intel/10G".parse().unwrap();
        assert!(desc.merge(&d).is_ok());
    }
}
