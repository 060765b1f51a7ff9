//! Error types for courseplay

use thiserror::Error;

/// Result type for courseplay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for courseplay
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// A page-side script threw
    #[error("Script error: {0}")]
    Script(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Settings store error
    #[error("Settings error: {0}")]
    Settings(String),

    /// Settings file watcher error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a settings error
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings(message.into())
    }

    /// True when the underlying connection to Chrome is gone
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdp_error_display() {
        let err = Error::cdp("Runtime.evaluate", -32000, "Cannot find context");
        assert_eq!(
            err.to_string(),
            "CDP error in Runtime.evaluate: Cannot find context (code -32000)"
        );
    }

    #[test]
    fn test_disconnected() {
        assert!(Error::transport("Response channel closed").is_disconnected());
        assert!(!Error::settings("bad").is_disconnected());
    }
}
