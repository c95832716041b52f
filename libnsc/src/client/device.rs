use crate::client::ClientError;
use crate::connection::NetworkServiceRequest;
use crate::context::CallContext;
use crate::mechanism::{DeviceParameters, Mechanism, DEFAULT_VFIO_DIR};
use log::*;
use std::path::{Path, PathBuf};

pub const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";

/// Requests a passthrough device. The forwarder needs the client's devices cgroup to grant access to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceMechanismClient {
    device_dir: PathBuf,
    cgroup_file: PathBuf,
}

impl Default for DeviceMechanismClient {
    fn default() -> Self {
        Self::new(DEFAULT_VFIO_DIR)
    }
}

impl DeviceMechanismClient {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self { device_dir: device_dir.into(), cgroup_file: PathBuf::from(PROC_SELF_CGROUP) }
    }

    pub fn with_cgroup_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cgroup_file = path.into();
        self
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    pub(crate) async fn prepare(&self, ctx: &CallContext, request: &mut NetworkServiceRequest) -> Result<(), ClientError> {
        let content = tokio::fs::read_to_string(&self.cgroup_file).await.map_err(|e| {
            ClientError::mechanism(format!("Could not read {}: {e}", self.cgroup_file.display()))
        })?;
        let cgroup_dir = parse_devices_cgroup(&content).ok_or_else(|| {
            ClientError::mechanism(format!("No devices cgroup found in {}", self.cgroup_file.display()))
        })?;
        trace!("{ctx} Devices cgroup: {cgroup_dir}");
        let params = DeviceParameters { device_dir: self.device_dir.clone(), cgroup_dir: Some(cgroup_dir) };
        request.mechanism_preferences.push(Mechanism::Device(params));
        Ok(())
    }
}

/// Finds the devices controller entry (`<hierarchy>:devices:<dir>`) in the contents of a `/proc/<pid>/cgroup` file.
pub fn parse_devices_cgroup(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (hierarchy, rest) = line.split_once(':')?;
        let dir = rest.strip_prefix("devices:")?;
        let valid_hierarchy = hierarchy.starts_with(|c: char| ('1'..='9').contains(&c))
            && hierarchy.chars().all(|c| c.is_ascii_digit());
        valid_hierarchy.then(|| dir.to_string())
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::connection::Connection;
    use std::collections::BTreeMap;
    use std::io::Write;

    const CGROUP_V1: &str = "12:pids:/kubepods/pod1\n\
        11:devices:/kubepods/besteffort/pod1/abc\n\
        10:memory:/kubepods/pod1\n\
        0::/\n";

    #[test]
    fn devices_line() {
        assert_eq!(parse_devices_cgroup(CGROUP_V1).as_deref(), Some("/kubepods/besteffort/pod1/abc"));
        assert_eq!(parse_devices_cgroup("0::/user.slice\n"), None);
        assert_eq!(parse_devices_cgroup("0:devices:/x\n"), None);
        assert_eq!(parse_devices_cgroup("a1:devices:/x\n"), None);
    }

    #[tokio::test]
    async fn preference_carries_cgroup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CGROUP_V1.as_bytes()).unwrap();
        let client = DeviceMechanismClient::default().with_cgroup_file(file.path());
        let mut request = NetworkServiceRequest::new(Connection::candidate("nsc-0", "svc", BTreeMap::new()));
        client.prepare(&CallContext::detached(), &mut request).await.unwrap();
        let params = request.mechanism_preferences[0].as_device().unwrap();
        assert_eq!(params.device_dir, PathBuf::from("/dev/vfio"));
        assert_eq!(params.cgroup_dir.as_deref(), Some("/kubepods/besteffort/pod1/abc"));
    }

    #[tokio::test]
    async fn missing_cgroup_fails_the_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0::/\n").unwrap();
        let client = DeviceMechanismClient::default().with_cgroup_file(file.path());
        let mut request = NetworkServiceRequest::new(Connection::candidate("nsc-0", "svc", BTreeMap::new()));
        let err = client.prepare(&CallContext::detached(), &mut request).await.unwrap_err();
        assert!(matches!(err, ClientError::Mechanism(_)));
        assert!(request.mechanism_preferences.is_empty());
    }
}
