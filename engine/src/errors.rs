use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("registry client error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("form system client error: {0}")]
    Form(#[from] forms::FormError),

    #[error("subject {login} carries no human-readable identifier attribute")]
    MissingHumanReadableId { login: String },
}
