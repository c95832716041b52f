use chrono::{DateTime, Utc};
use libp2p::identity::{Keypair, PublicKey};
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::path::Path;
use thiserror::Error;

/// The client's name and long-term key. The key authenticates the transport and signs path-segment tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    name: String,
    #[serde(serialize_with = "serialize_key", deserialize_with = "deserialize_key")]
    keypair: Keypair,
}

impl ClientIdentity {
    pub fn random_with_name<S: Into<String>>(name: S) -> Self {
        ClientIdentity { name: name.into(), keypair: Keypair::generate_ed25519() }
    }

    pub fn random() -> Self {
        Self::random_with_name(random_name())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.public().to_peer_id()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IdentityError> {
        std::fs::write(path, self.to_yml()?)?;
        Ok(())
    }

    pub fn to_yml(&self) -> Result<String, IdentityError> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IdentityError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&text)?)
    }

    /// Signs the claim that path segment `segment_name`/`segment_id` belongs to this client until `expires`. The token
    /// is the hex-encoded signature.
    pub fn issue_token(
        &self,
        segment_name: &str,
        segment_id: &str,
        expires: DateTime<Utc>,
    ) -> Result<String, IdentityError> {
        let claim = token_claim(segment_name, segment_id, expires);
        let signature = self.keypair.sign(claim.as_bytes()).map_err(|e| IdentityError::Signing(e.to_string()))?;
        Ok(hex::encode(signature))
    }
}

fn token_claim(segment_name: &str, segment_id: &str, expires: DateTime<Utc>) -> String {
    format!("{segment_name}|{segment_id}|{}", expires.timestamp())
}

/// Checks a token produced by [`ClientIdentity::issue_token`]. Expiry is not checked here.
pub fn verify_token(
    key: &PublicKey,
    segment_name: &str,
    segment_id: &str,
    expires: DateTime<Utc>,
    token: &str,
) -> bool {
    let Ok(signature) = hex::decode(token) else {
        return false;
    };
    key.verify(token_claim(segment_name, segment_id, expires).as_bytes(), &signature)
}

impl Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.peer_id())
    }
}

impl Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientIdentity({self})")
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.keypair.public() == other.keypair.public()
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Error reading/writing identity: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error de/encoding identity: {0}")]
    Serde(#[from] serde_yml::Error),
    #[error("Could not sign the token. {0}")]
    Signing(String),
}

const ADJECTIVES: [&str; 24] = [
    "amber", "brisk", "calm", "dapper", "eager", "fuzzy", "gentle", "hasty", "icy", "jolly", "keen", "lucky", "mellow",
    "nimble", "plucky", "quiet", "rusty", "sunny", "tidy", "upbeat", "vivid", "wiry", "young", "zippy",
];

const ANIMALS: [&str; 24] = [
    "otter", "heron", "lynx", "marmot", "gecko", "badger", "ibis", "koala", "lemur", "newt", "ocelot", "puffin", "quail",
    "raven", "stoat", "tapir", "vole", "walrus", "yak", "zebu", "bison", "dingo", "ferret", "gopher",
];

fn random_name() -> String {
    let i = rand::random_range(0..ADJECTIVES.len());
    let j = rand::random_range(0..ANIMALS.len());
    format!("{}-{}", ADJECTIVES[i], ANIMALS[j])
}

fn serialize_key<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let bytes = key.to_protobuf_encoding().map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&hex::encode(bytes))
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
    Keypair::from_protobuf_encoding(&bytes).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn identity_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.yml");
        let identity = ClientIdentity::random();
        identity.save(&path).expect("save identity");
        let loaded = ClientIdentity::load(&path).expect("load identity");
        assert_eq!(identity, loaded);
        assert_eq!(identity.peer_id(), loaded.peer_id());
        assert!(identity.name().contains('-'));
    }

    #[test]
    fn tokens_verify_against_the_public_key() {
        let identity = ClientIdentity::random_with_name("nsc");
        let expires = Utc::now() + TimeDelta::minutes(10);
        let token = identity.issue_token("nsc", "nsc-0", expires).unwrap();
        let key = identity.keypair().public();
        assert!(verify_token(&key, "nsc", "nsc-0", expires, &token));
        assert!(!verify_token(&key, "nsc", "nsc-1", expires, &token));
        assert!(!verify_token(&key, "nsc", "nsc-0", expires + TimeDelta::seconds(1), &token));
        assert!(!verify_token(&key, "nsc", "nsc-0", expires, "not hex"));
        let other = ClientIdentity::random();
        assert!(!verify_token(&other.keypair().public(), "nsc", "nsc-0", expires, &token));
    }
}
