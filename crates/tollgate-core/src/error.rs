use tollgate_api::resources::ResourceType;

use crate::sync::SyncErrors;

/// A `Result` alias where the `Err` case is `tollgate_core::Error`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to translate {kind} {name}: {source}")]
    Translate {
        kind: &'static str,
        name: String,
        #[source]
        source: tollgate_api::Error,
    },

    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: ResourceType,
        id: String,
    },

    #[error("owner labels must name a kind, namespace, or name")]
    MissingOwner,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sync(#[from] SyncErrors),
}

impl Error {
    pub(crate) fn not_found(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Returns `true` if this error is a lookup for something that isn't in
    /// the cache.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
