pub mod manager;
pub mod parse;
pub mod wire;

use crate::format::LogFormat;
use crate::record::Record;
use crate::verdict::Verdict;
use async_trait::async_trait;
use thiserror::Error;

pub use manager::AiServiceManager;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("no AI endpoint available (all disabled, rate limited, or already tried)")]
    Exhausted,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("endpoint {endpoint} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last: Box<AiError>,
    },
}

impl AiError {
    /// Whether another attempt against the same endpoint may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Http(e) => !e.is_decode() && !e.is_builder(),
            AiError::Status { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AiError>;

/// Turns records into verdicts, one verdict per record in order.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, format: LogFormat, records: &[Record]) -> Result<Vec<Verdict>>;
}
