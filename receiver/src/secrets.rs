use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Key used for the implicit instance of a receiver, when the request path has no id.
pub const DEFAULT_INSTANCE: &str = "default";

/// Secret material for one receiver instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Secret(value.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes>)", self.0.len())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SecretStoreError {
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Source of per-instance receiver secrets.
///
/// Lookups may suspend on I/O; the verifier bounds them with a timeout.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns `None` when nothing is configured for the instance.
    async fn get_secret(
        &self,
        receiver: &str,
        id: Option<&str>,
    ) -> Result<Option<Secret>, SecretStoreError>;
}

/// Secret store backed by the `secrets` section of the config file.
///
/// ```yaml
/// secrets:
///   github:
///     default: "..."
///     team-a: "..."
/// ```
#[derive(Default)]
pub struct ConfigSecretStore {
    secrets: HashMap<String, HashMap<String, Secret>>,
}

impl ConfigSecretStore {
    pub fn new(config: &HashMap<String, HashMap<String, String>>) -> Self {
        let secrets = config
            .iter()
            .map(|(receiver, instances)| {
                let instances = instances
                    .iter()
                    .map(|(id, value)| (id.clone(), Secret::new(value.as_bytes())))
                    .collect();
                (receiver.to_ascii_lowercase(), instances)
            })
            .collect();
        Self { secrets }
    }

    pub fn insert(&mut self, receiver: &str, id: Option<&str>, secret: Secret) {
        self.secrets
            .entry(receiver.to_ascii_lowercase())
            .or_default()
            .insert(id.unwrap_or(DEFAULT_INSTANCE).to_string(), secret);
    }
}

#[async_trait]
impl SecretStore for ConfigSecretStore {
    async fn get_secret(
        &self,
        receiver: &str,
        id: Option<&str>,
    ) -> Result<Option<Secret>, SecretStoreError> {
        Ok(self
            .secrets
            .get(&receiver.to_ascii_lowercase())
            .and_then(|instances| instances.get(id.unwrap_or(DEFAULT_INSTANCE)))
            .cloned())
    }
}
