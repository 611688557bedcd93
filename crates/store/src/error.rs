use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bulk write rejected {failed} of {total} documents: {reason}")]
    Bulk {
        failed: usize,
        total: usize,
        reason: String,
    },

    #[error("invalid name: {0}")]
    InvalidName(String),
}
