use thiserror::Error;

/// Failure of a single upstream round trip.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid {what} json: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("empty {0} response")]
    Empty(&'static str),

    #[error("http client build failed: {0}")]
    Client(String),
}

impl FetchError {
    /// Transport failures and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("match history fetch failed: {0}")]
    History(#[source] FetchError),

    #[error("report persistence failed: {0}")]
    Store(#[from] StoreError),
}
