use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shard '{shard}' not found in blob store")]
    ShardNotFound { shard: String },

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Unsatisfiable range: {0}")]
    Range(String),

    #[error("Memory budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Malformed {what}: {detail}")]
    Format { what: String, detail: String },

    #[error("Store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn format(what: impl Into<String>, detail: impl Into<String>) -> Self {
        GatewayError::Format {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
