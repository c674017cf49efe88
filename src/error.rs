//! Error kinds surfaced by the evaluation engine.

use std::fmt;

use thiserror::Error;

/// Every failure the engine reports to its caller.
#[derive(Debug, Error)]
pub enum HeError {
    /// Bad context parameters, empty polynomial, bad noise parameters, bad input values.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Malformed context or ciphertext bytes.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// Operands were produced under different scheme contexts.
    #[error("ciphertext belongs to context {found}, engine is bound to {expected}")]
    ContextMismatch {
        /// Identifier of the context the engine is bound to.
        expected: String,
        /// Identifier carried by the offending ciphertext.
        found: String,
    },

    /// Operands sit at different levels and no alignment was requested.
    #[error("level mismatch: {left} vs {right}")]
    LevelMismatch {
        /// Level of the left operand (or current level when aligning).
        left: usize,
        /// Level of the right operand (or requested level when aligning).
        right: usize,
    },

    /// The modulus chain cannot absorb another multiplication.
    #[error("noise budget exhausted: {0}")]
    NoiseBudgetExhausted(String),

    /// The ciphertext does not parse or decrypt under the given context.
    #[error("decryption failed: {0}")]
    DecryptionError(String),

    /// No scheme context has been initialised for the session.
    #[error("scheme context not initialised for this session")]
    ContextNotReady,

    /// The external policy decision denied the request.
    #[error("access denied for actor {0}")]
    AccessDenied(String),

    /// Rotation requested for a step with no Galois key attached.
    #[error("no galois key attached for rotation by {0}")]
    MissingGaloisKey(i64),
}

/// Coarse classification of a [`HeError`], used for state tracking and audit statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[allow(missing_docs)]
    InvalidParameters,
    #[allow(missing_docs)]
    DeserializationError,
    #[allow(missing_docs)]
    ContextMismatch,
    #[allow(missing_docs)]
    LevelMismatch,
    #[allow(missing_docs)]
    NoiseBudgetExhausted,
    #[allow(missing_docs)]
    DecryptionError,
    #[allow(missing_docs)]
    ContextNotReady,
    #[allow(missing_docs)]
    AccessDenied,
    #[allow(missing_docs)]
    MissingGaloisKey,
}

impl HeError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            HeError::DeserializationError(_) => ErrorKind::DeserializationError,
            HeError::ContextMismatch { .. } => ErrorKind::ContextMismatch,
            HeError::LevelMismatch { .. } => ErrorKind::LevelMismatch,
            HeError::NoiseBudgetExhausted(_) => ErrorKind::NoiseBudgetExhausted,
            HeError::DecryptionError(_) => ErrorKind::DecryptionError,
            HeError::ContextNotReady => ErrorKind::ContextNotReady,
            HeError::AccessDenied(_) => ErrorKind::AccessDenied,
            HeError::MissingGaloisKey(_) => ErrorKind::MissingGaloisKey,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HeError::InvalidParameters(msg.into())
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Self {
        HeError::NoiseBudgetExhausted(msg.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidParameters => "InvalidParameters",
            ErrorKind::DeserializationError => "DeserializationError",
            ErrorKind::ContextMismatch => "ContextMismatch",
            ErrorKind::LevelMismatch => "LevelMismatch",
            ErrorKind::NoiseBudgetExhausted => "NoiseBudgetExhausted",
            ErrorKind::DecryptionError => "DecryptionError",
            ErrorKind::ContextNotReady => "ContextNotReady",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::MissingGaloisKey => "MissingGaloisKey",
        };
        f.write_str(name)
    }
}

impl From<bincode::Error> for HeError {
    fn from(err: bincode::Error) -> Self {
        HeError::DeserializationError(err.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(HeError::invalid("x").kind(), ErrorKind::InvalidParameters);
        assert_eq!(HeError::exhausted("x").kind(), ErrorKind::NoiseBudgetExhausted);
        assert_eq!(
            HeError::LevelMismatch { left: 0, right: 1 }.kind(),
            ErrorKind::LevelMismatch
        );
        assert_eq!(HeError::ContextNotReady.kind().to_string(), "ContextNotReady");
    }
}
