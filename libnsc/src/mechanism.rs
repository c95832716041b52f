use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// The longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Default directory holding VFIO group devices.
pub const DEFAULT_VFIO_DIR: &str = "/dev/vfio";

/// The closed set of data-plane mechanisms this client can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MechanismType {
    /// A kernel network interface injected into the client's network namespace.
    Kernel,
    /// An accelerated device passed through to the client (VFIO).
    Device,
}

impl MechanismType {
    pub const ALL: [MechanismType; 2] = [MechanismType::Kernel, MechanismType::Device];

    /// The canonical descriptor scheme for this mechanism.
    pub fn tag(&self) -> &'static str {
        match self {
            MechanismType::Kernel => "kernel",
            MechanismType::Device => "device",
        }
    }

    /// Resolves a descriptor scheme. Matching is case-sensitive. `vfio` is kept as an alias of `device`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "kernel" => Some(MechanismType::Kernel),
            "device" | "vfio" => Some(MechanismType::Device),
            _ => None,
        }
    }
}

impl Display for MechanismType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Unsupported mechanism '{0}'. Supported mechanisms: kernel, device")]
pub struct UnknownMechanism(pub String);

impl FromStr for MechanismType {
    type Err = UnknownMechanism;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MechanismType::from_tag(s).ok_or_else(|| UnknownMechanism(s.to_string()))
    }
}

/// Parameters of a kernel interface mechanism.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelParameters {
    /// The name the interface should carry inside the client's namespace.
    pub interface_name: Option<String>,
    /// `inode://<dev>/<ino>` reference to the client's network namespace.
    pub netns_url: Option<String>,
}

/// Parameters of a device passthrough mechanism.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParameters {
    pub device_dir: PathBuf,
    /// The devices cgroup of the client, so that the forwarder can grant device access.
    pub cgroup_dir: Option<String>,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self { device_dir: PathBuf::from(DEFAULT_VFIO_DIR), cgroup_dir: None }
    }
}

/// A mechanism together with its concrete parameters. Used both as a preference on outgoing requests and as the
/// negotiated mechanism on an established connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mechanism {
    Kernel(KernelParameters),
    Device(DeviceParameters),
}

impl Mechanism {
    pub fn mechanism_type(&self) -> MechanismType {
        match self {
            Mechanism::Kernel(_) => MechanismType::Kernel,
            Mechanism::Device(_) => MechanismType::Device,
        }
    }

    pub fn as_kernel(&self) -> Option<&KernelParameters> {
        match self {
            Mechanism::Kernel(params) => Some(params),
            Mechanism::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceParameters> {
        match self {
            Mechanism::Device(params) => Some(params),
            Mechanism::Kernel(_) => None,
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::Kernel(p) => match &p.interface_name {
                Some(name) => write!(f, "kernel({name})"),
                None => write!(f, "kernel"),
            },
            Mechanism::Device(p) => write!(f, "device({})", p.device_dir.display()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags_are_case_sensitive() {
        assert_eq!(MechanismType::from_tag("kernel"), Some(MechanismType::Kernel));
        assert_eq!(MechanismType::from_tag("vfio"), Some(MechanismType::Device));
        assert_eq!(MechanismType::from_tag("device"), Some(MechanismType::Device));
        assert_eq!(MechanismType::from_tag("Kernel"), None);
        assert_eq!(MechanismType::from_tag("memif"), None);
        assert!("KERNEL".parse::<MechanismType>().is_err());
    }

    #[test]
    fn mechanism_reports_its_type() {
        let m = Mechanism::Kernel(KernelParameters { interface_name: Some("nsm0".into()), netns_url: None });
        assert_eq!(m.mechanism_type(), MechanismType::Kernel);
        assert_eq!(m.to_string(), "kernel(nsm0)");
        let d = Mechanism::Device(DeviceParameters::default());
        assert_eq!(d.mechanism_type(), MechanismType::Device);
        assert!(d.as_kernel().is_none());
    }
}
