//! Error types and error handling strategy.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed; leaf types derive `thiserror::Error`
//! - Transient I/O failures surface through the per-operation return
//! - Task panics are caught at the task boundary and never propagate into
//!   the scheduler
//! - Programming errors (two waiters on one fd direction, wait-group
//!   underflow) are rejected at the call site

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Deadline or per-operation timeout exceeded.
    TimedOut,
    /// Channel is closed.
    ChannelClosed,
    /// Channel is full (would block).
    ChannelFull,
    /// Channel is empty (would block).
    ChannelEmpty,
    /// The runtime has been shut down.
    RuntimeShutdown,
    /// The runtime singleton was already started.
    RuntimeStarted,
    /// Could not create a worker thread.
    ThreadSpawn,
    /// Invalid use of a primitive (caller bug).
    InvalidUsage,
    /// Internal runtime error (bug).
    Internal,
    /// User-provided error.
    User,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error is a timeout condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<crate::time::Elapsed> for Error {
    fn from(_: crate::time::Elapsed) -> Self {
        Self::new(ErrorKind::TimedOut)
    }
}

/// Extension trait for adding context to results.
pub trait ResultExt<T> {
    /// Attaches a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attaches context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized `Result` for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::ChannelEmpty).with_context("no messages");
        assert_eq!(err.to_string(), "ChannelEmpty: no messages");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::User)
            .with_context("outer")
            .with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn timeout_predicate() {
        assert!(Error::new(ErrorKind::TimedOut).is_timeout());
        assert!(!Error::new(ErrorKind::ChannelClosed).is_timeout());
    }
}
