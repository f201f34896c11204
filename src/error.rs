use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("key manager error: {0}")]
    KeyManager(String),

    #[error("no credential available for pool '{pool}' after {attempts} attempts")]
    CredentialUnavailable { pool: String, attempts: u32 },

    #[error("target error: {0}")]
    Target(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}
