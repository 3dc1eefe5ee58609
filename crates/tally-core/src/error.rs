//! Shared error type across tally crates.

use thiserror::Error;

/// Error classes used for logging and handling decisions (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed spec source or daemon config.
    Config,
    /// Spec content rejected by validation.
    Validation,
    /// Name already live in the registry. Benign.
    AlreadyRegistered,
    /// Per-update failure; the update is dropped.
    Dispatch,
    /// Per-connection failure; the connection is dropped.
    Transport,
    /// Resource acquisition or internal failure; the process exits.
    Fatal,
}

impl ErrorClass {
    /// String representation used in log fields and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Config => "CONFIG",
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorClass::Dispatch => "DISPATCH",
            ErrorClass::Transport => "TRANSPORT",
            ErrorClass::Fatal => "FATAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, TallyError>;

/// Unified error type used by core and daemon.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("config: {0}")]
    Config(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("metric already registered: {0}")]
    AlreadyRegistered(String),
    #[error("metric not found: {0}")]
    NotFound(String),
    #[error("label arity mismatch for {name}: expected {expected} label values, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("counter {name} cannot decrease (add {value})")]
    NegativeCounter { name: String, value: f64 },
    #[error("transport: {0}")]
    Transport(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl TallyError {
    /// Map the error to its handling class.
    pub fn class(&self) -> ErrorClass {
        match self {
            TallyError::Config(_) => ErrorClass::Config,
            TallyError::Validation(_) => ErrorClass::Validation,
            TallyError::AlreadyRegistered(_) => ErrorClass::AlreadyRegistered,
            TallyError::NotFound(_)
            | TallyError::LabelArity { .. }
            | TallyError::NegativeCounter { .. } => ErrorClass::Dispatch,
            TallyError::Transport(_) => ErrorClass::Transport,
            TallyError::Io(_) | TallyError::Internal(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_already_registered(&self) -> bool {
        matches!(self, TallyError::AlreadyRegistered(_))
    }
}
