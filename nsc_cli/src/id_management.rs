use crate::error::ConfigError;
use nsc_p2p::ClientIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The client identities kept on this machine, keyed by name.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LocalIdentitySet {
    pub identities: BTreeMap<String, ClientIdentity>,
}

impl LocalIdentitySet {
    pub fn try_load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let ids = load_identity_file(path)?;
        Ok(ids)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        save_identity_file(path, self)
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClientIdentity> {
        self.identities.get(name)
    }

    pub fn insert(&mut self, identity: ClientIdentity) -> Option<ClientIdentity> {
        self.identities.insert(identity.name().to_string(), identity)
    }

    pub fn remove<S: AsRef<str>>(&mut self, name: S) -> Option<ClientIdentity> {
        self.identities.remove(name.as_ref())
    }

    /// Removes and returns the identity called `name`, or the first one by name when `name` is `None`.
    pub fn take(&mut self, name: Option<&str>) -> Option<ClientIdentity> {
        match name {
            Some(name) => self.remove(name),
            None => self.identities.pop_first().map(|(_, id)| id),
        }
    }
}

pub fn default_id_path() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".nsc");
    home.push("identities.yml");
    home
}

pub fn load_identity_file<P: AsRef<Path>>(path: Option<P>) -> Result<LocalIdentitySet, ConfigError> {
    let path = path.map(|p| p.as_ref().to_path_buf()).unwrap_or_else(default_id_path);
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let identities = serde_yml::from_reader(reader)?;
    Ok(identities)
}

pub fn save_identity_file<P: AsRef<Path>>(path: P, ids: &LocalIdentitySet) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_yml::to_writer(writer, ids)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identities.yml");
        let mut ids = LocalIdentitySet::default();
        ids.insert(ClientIdentity::random_with_name("bob"));
        ids.insert(ClientIdentity::random_with_name("alice"));
        ids.save(&path).unwrap();

        let mut loaded = LocalIdentitySet::try_load(Some(&path)).unwrap();
        assert!(loaded.contains("alice"));
        assert_eq!(loaded.get("bob"), ids.get("bob"));
        assert_eq!(loaded.take(None).unwrap().name(), "alice");
        assert_eq!(loaded.take(Some("bob")).unwrap().name(), "bob");
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalIdentitySet::try_load(Some(dir.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
