use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolaceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl SolaceError {
    /// A setting that parsed but holds an unsupported value.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        SolaceError::Config(config::ConfigError::Message(message.into()))
    }
}
