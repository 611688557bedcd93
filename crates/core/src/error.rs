use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("invalid ttl '{0}': expected <number><s|m|h|d>")]
    InvalidTtl(String),

    #[error("unsupported time interval: {0}")]
    UnsupportedInterval(String),

    #[error("{0}")]
    Other(String),
}
