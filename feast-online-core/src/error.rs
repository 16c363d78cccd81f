use std::fmt::{self, Display, Formatter};

/// Failures surfaced by backend selection and by online reads.
///
/// Selection returns `anyhow::Result`, so callers recover these with
/// `err.downcast_ref::<OnlineStoreError>()`.
#[derive(Debug)]
pub enum OnlineStoreError {
    Configuration {
        config: String,
        reason: String,
    },
    UnsupportedBackend {
        backend_type: String,
    },
    StoreRead {
        view_name: String,
        source: anyhow::Error,
    },
}

impl OnlineStoreError {
    pub fn configuration(config: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            config: config.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend_type: backend_type.into(),
        }
    }

    pub fn store_read(view_name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::StoreRead {
            view_name: view_name.into(),
            source: source.into(),
        }
    }

    pub fn released(view_name: impl Into<String>) -> Self {
        Self::store_read(view_name, anyhow::anyhow!("online store has been released"))
    }
}

impl Display for OnlineStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { config, reason } => {
                write!(
                    f,
                    "Invalid online store configuration {}: {}",
                    config, reason
                )
            }
            Self::UnsupportedBackend { backend_type } => {
                write!(f, "Unsupported online store type '{}'", backend_type)
            }
            Self::StoreRead { view_name, source } => write!(
                f,
                "Failed to read feature view '{}' from online store: {:#}",
                view_name, source
            ),
        }
    }
}

impl std::error::Error for OnlineStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StoreRead { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
