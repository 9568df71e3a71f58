use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the credential and token core.
///
/// Expected branches (unknown user, expired link, revoked token) are outcome values,
/// never errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("operation cancelled")]
    Cancelled,
    /// A concurrent writer changed the row first.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("malformed base64 in {0}")]
    Encoding(&'static str),
    #[error("jwt error")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("secure random source failed")]
    Random(#[from] rand::Error),
    #[error("email delivery failed")]
    Email(#[source] anyhow::Error),
    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinct_from_failures() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::InvalidState("empty".to_string()).is_cancelled());
        assert!(!Error::Encoding("salt").is_cancelled());
    }

    #[test]
    fn messages_name_the_failing_input() {
        assert_eq!(
            Error::Encoding("password salt").to_string(),
            "malformed base64 in password salt"
        );
        assert_eq!(
            Error::InvalidArgument("context is required".to_string()).to_string(),
            "invalid argument: context is required"
        );
    }
}
