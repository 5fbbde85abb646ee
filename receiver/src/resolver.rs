use std::sync::Arc;

use crate::errors::ReceiverError;
use crate::metadata::{MetadataRegistry, ReceiverMetadata};

/// A request path resolved to its receiver.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub metadata: Arc<ReceiverMetadata>,
    /// Opaque instance id, the optional second path segment.
    pub id: Option<String>,
}

/// Maps `{route_prefix}/{receiver}/{id?}` onto registered receivers.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<MetadataRegistry>,
    prefix: String,
}

impl Resolver {
    pub fn new(registry: Arc<MetadataRegistry>, route_prefix: &str) -> Self {
        Self {
            registry,
            prefix: route_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_prefix(self, route_prefix: &str) -> Self {
        Self::new(self.registry, route_prefix)
    }

    pub fn resolve(&self, path: &str) -> Result<Resolved, ReceiverError> {
        let Some(rest) = path.strip_prefix(&self.prefix) else {
            tracing::debug!(path, "Path outside of route prefix");
            return Err(ReceiverError::NotFound);
        };
        // "/api/webhooks/incomingfoo" must not match the prefix
        let Some(rest) = rest.strip_prefix('/') else {
            return Err(ReceiverError::NotFound);
        };

        let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        let (name, id) = match segments.as_slice() {
            [name] if !name.is_empty() => (*name, None),
            [name, id] if !name.is_empty() && !id.is_empty() => (*name, Some(id.to_string())),
            _ => {
                tracing::debug!(path, "Path does not name a receiver");
                return Err(ReceiverError::NotFound);
            }
        };

        match self.registry.get(name) {
            Some(metadata) => {
                tracing::debug!(receiver = %metadata.name, id = ?id, "Resolved receiver");
                Ok(Resolved { metadata, id })
            }
            None => {
                tracing::warn!(receiver = name, "Unknown receiver");
                Err(ReceiverError::UnknownReceiver(name.to_string()))
            }
        }
    }
}
