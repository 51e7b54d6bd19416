use thiserror::Error;

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;

/// Failures the crawlers react to. Anything that only needs context for a
/// human travels as `anyhow::Error` instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("request failed with non-retryable status {status}")]
    Http { status: u16 },

    #[error("gave up after {attempts} attempts (last status: {last_status:?})")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("target file error: {0}")]
    Targets(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<csv::Error> for HarvestError {
    fn from(value: csv::Error) -> Self {
        HarvestError::Targets(value.to_string())
    }
}
