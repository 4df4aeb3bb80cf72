//! Typed errors for the snapshot store and activation engine.
//!
//! The command layer works in `anyhow`; everything below it reports one of
//! three failure kinds so callers can tell a missing snapshot apart from a
//! half-finished copy or a bad request.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A snapshot or source directory that must exist does not.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A read, write, rename or remove failed partway.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The request does not match the tool's bookkeeping.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Attach a message to an `io::Error`, in the spirit of `anyhow::Context`.
pub trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> StoreResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C, F>(self, f: F) -> StoreResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| StoreError::Io {
            context: f().into(),
            source,
        })
    }
}
