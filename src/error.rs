use thiserror::Error;

/// Failure kinds for a single credential-refresh attempt.
///
/// The scheduler treats `DependencyMissing` and `RemoteCall` identically
/// (count the attempt, cool down, retry); `Validation` is surfaced to the
/// caller at the API boundary and never retried; `Persistence` is logged
/// and never fails a refresh.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("missing dependency: {0}")]
    DependencyMissing(String),

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        RefreshError::RemoteCall(err.to_string())
    }
}
