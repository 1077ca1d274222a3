use config::ConfigError;
use thiserror::Error;

use crate::topic::TopicError;
use crate::types::ClientId;

pub type Result<T, E = GeomqError> = std::result::Result<T, E>;

/// Message-level errors. All variants are recoverable: one bad message never
/// crashes a worker or leaves shared state half mutated.
#[derive(Debug, Error)]
pub enum GeomqError {
    #[error("protocol error, {0}")]
    Protocol(String),
    #[error("client `{0}` is not connected")]
    NotConnected(ClientId),
    #[error("invalid geometry, {0}")]
    InvalidGeometry(String),
    #[error("topic error, {0}")]
    Topic(#[from] TopicError),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<String> for GeomqError {
    #[inline]
    fn from(e: String) -> Self {
        GeomqError::Msg(e)
    }
}

impl From<&str> for GeomqError {
    #[inline]
    fn from(e: &str) -> Self {
        GeomqError::Msg(e.to_string())
    }
}

impl From<bincode::Error> for GeomqError {
    #[inline]
    fn from(e: bincode::Error) -> Self {
        GeomqError::Protocol(e.to_string())
    }
}
