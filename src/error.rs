use thiserror::Error;

use crate::backoff::BackoffError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Simulated failure in {operation}: {message}")]
    SimulatedFailure {
        operation: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Retry failed: {0}")]
    RetryFailed(#[from] BackoffError),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// HTTP-like status class of this error.
    ///
    /// `400` for bad input, `404` for missing entities and `500` for everything that went wrong while
    /// doing the work.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::SimulatedFailure { .. }
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::RetryFailed(_) => 500,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Per-item outcomes of a batch operation, in input order.
#[derive(Debug)]
#[must_use]
pub struct ResultVec<T, E = Error>(Vec<Result<T, E>>);

impl<T, E> ResultVec<T, E> {
    /// Unpacks results if all are `Ok` or returns first error.
    pub fn unpack(self) -> Result<Vec<T>, E> {
        self.0.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Result<T, E>> {
        self.0.iter()
    }

    pub fn success_count(&self) -> usize {
        self.0.iter().filter(|r| r.is_ok()).count()
    }
}

impl<T, E> From<Vec<Result<T, E>>> for ResultVec<T, E> {
    fn from(v: Vec<Result<T, E>>) -> Self {
        Self(v)
    }
}

impl<T, E> IntoIterator for ResultVec<T, E> {
    type Item = Result<T, E>;

    type IntoIter = std::vec::IntoIter<Result<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Error::validation("cluster id must not be empty").code(), 400);
        assert_eq!(Error::not_found("topic", "orders").code(), 404);
        assert_eq!(
            Error::SimulatedFailure {
                operation: "send_message",
                message: "network error".to_owned(),
            }
            .code(),
            500
        );
    }

    #[test]
    fn test_result_vec_unpack() {
        let ok: ResultVec<u8> = vec![Ok(1), Ok(2)].into();
        assert_eq!(ok.success_count(), 2);
        assert_eq!(ok.unpack().unwrap(), vec![1, 2]);

        let mixed: ResultVec<u8> = vec![Ok(1), Err(Error::validation("bad")), Ok(3)].into();
        assert_eq!(mixed.len(), 3);
        assert_eq!(mixed.success_count(), 2);
        assert_eq!(mixed.unpack().unwrap_err().code(), 400);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::not_found("consumer group", "billing").to_string(),
            "consumer group 'billing' not found"
        );
        assert_eq!(
            Error::validation("topic name must not be empty").to_string(),
            "Invalid input: topic name must not be empty"
        );
    }
}
