use crate::client::ClientError;
use crate::connection::NetworkServiceRequest;
use crate::context::CallContext;
use crate::mechanism::{KernelParameters, Mechanism};
use log::*;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// The network namespace of the calling thread.
pub const THREAD_NETNS_PATH: &str = "/proc/thread-self/ns/net";

/// Requests a kernel interface with a fixed name in the caller's network namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelMechanismClient {
    interface_name: String,
    netns_path: PathBuf,
}

impl KernelMechanismClient {
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self { interface_name: interface_name.into(), netns_path: PathBuf::from(THREAD_NETNS_PATH) }
    }

    pub fn with_netns_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.netns_path = path.into();
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub(crate) async fn prepare(&self, ctx: &CallContext, request: &mut NetworkServiceRequest) -> Result<(), ClientError> {
        let netns_url = match netns_inode_url(&self.netns_path).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("{ctx} Could not resolve the network namespace at {}: {e}", self.netns_path.display());
                None
            }
        };
        let params = KernelParameters { interface_name: Some(self.interface_name.clone()), netns_url };
        request.mechanism_preferences.push(Mechanism::Kernel(params));
        Ok(())
    }
}

/// Identifies a namespace file by device and inode, as `inode://<dev>/<ino>`.
pub async fn netns_inode_url(path: &Path) -> std::io::Result<String> {
    let meta = tokio::fs::metadata(path).await?;
    Ok(format!("inode://{}/{}", meta.dev(), meta.ino()))
}
