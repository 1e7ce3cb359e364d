//! Error taxonomy of the script host

use crate::generation::ContextId;
use thiserror::Error;

/// A context could not be built from a script source.
///
/// No usable context is ever produced from an attempt that fails with this error.
#[derive(Debug, Error)]
pub enum ScriptLoadError {
    #[error("failed to read script '{locator}': {source}")]
    Read {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script '{locator}' is not valid UTF-8")]
    Encoding { locator: String },

    #[error("script evaluation failed: {message}")]
    Evaluate { message: String },

    #[error("failed to set up the script engine: {message}")]
    Engine { message: String },

    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("the context manager has been shut down")]
    ShutDown,
}

/// A single `invoke`/`run` call failed.
///
/// None of these affect the validity of the context the call was routed to.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("entry point '{name}' is not defined")]
    EntryPointNotFound { name: String },

    #[error("entry point '{name}' raised: {message}")]
    GuestRuntime { name: String, message: String },

    #[error("context {id} is closed")]
    ContextClosed { id: ContextId },

    #[error("arguments for '{name}' could not be encoded: {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl InvocationError {
    /// `ContextClosed` is the only variant worth retrying against the manager.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContextClosed { .. })
    }
}

/// The first context could not be built; the host cannot run without it.
#[derive(Debug, Error)]
#[error("startup failed: {0}")]
pub struct StartupError(#[from] pub ScriptLoadError);

/// Host settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_closed_is_retryable() {
        let closed = InvocationError::ContextClosed { id: ContextId(3) };
        let missing = InvocationError::EntryPointNotFound { name: "entryA".into() };

        assert!(closed.is_retryable());
        assert!(!missing.is_retryable());
        assert_eq!(closed.to_string(), "context 3 is closed");
    }

    #[test]
    fn test_startup_error_wraps_load_error() {
        let err = StartupError::from(ScriptLoadError::Evaluate {
            message: "SyntaxError: unexpected token".into(),
        });
        assert_eq!(
            err.to_string(),
            "startup failed: script evaluation failed: SyntaxError: unexpected token"
        );
    }
}
