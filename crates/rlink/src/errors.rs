use std::io;
use thiserror::Error;

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("An R session is already live in this process")]
    AlreadyInitialized,

    #[error("The R session has been closed")]
    SessionClosed,

    #[error("Parse error: {0}")]
    Parse(String),

    /// Carries the runtime's condition message verbatim
    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("'{0}' is not a syntactically valid R identifier")]
    InvalidIdentifier(String),

    #[error("object '{0}' not found")]
    UndefinedSymbol(String),

    #[error("Value cannot be marshaled losslessly: {0}")]
    UnrepresentableType(String),

    #[error("Value nesting exceeds the depth bound of {depth} (cyclic structure?)")]
    CyclicValue { depth: usize },

    #[error("Mixed-type sequence: element {index} is {found}, expected {expected}")]
    HeterogeneousSequence {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("R runtime not found: {0}")]
    RuntimeNotFound(String),

    #[error("Failed to initialize R runtime: {0}")]
    Initialization(String),

    /// The interpreter died mid-session; the session is closed afterwards
    #[error("The R runtime exited unexpectedly: {0}")]
    RuntimeExited(String),

    #[error("Protocol error talking to R: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// Whether retrying the same call can succeed
    ///
    /// Runtime errors are deterministic for a given code and state; only
    /// `AlreadyInitialized` clears once the live session is closed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::AlreadyInitialized)
    }
}

impl From<rlink_config::ConfigError> for BridgeError {
    fn from(err: rlink_config::ConfigError) -> Self {
        match err {
            rlink_config::ConfigError::RNotFound | rlink_config::ConfigError::RPath(_) => {
                BridgeError::RuntimeNotFound(err.to_string())
            }
            other => BridgeError::Initialization(format!("Failed to load config: {}", other)),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(format!("malformed frame: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_symbol_display_matches_r() {
        let err = BridgeError::UndefinedSymbol("doesNotExist".to_string());
        assert_eq!(err.to_string(), "object 'doesNotExist' not found");
    }

    #[test]
    fn test_only_already_initialized_is_retryable() {
        assert!(BridgeError::AlreadyInitialized.is_retryable());
        assert!(!BridgeError::SessionClosed.is_retryable());
        assert!(!BridgeError::Eval("boom".to_string()).is_retryable());
    }

    #[test]
    fn test_config_errors_map_to_runtime_not_found() {
        let err: BridgeError = rlink_config::ConfigError::RNotFound.into();
        assert!(matches!(err, BridgeError::RuntimeNotFound(_)));
    }
}
