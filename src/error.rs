use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeError {
    #[error("level mismatch: expected {expected}, got {got}")]
    LevelMismatch { expected: usize, got: usize },

    #[error("level underflow: ciphertext at level {level} cannot drop {needed} more moduli")]
    LevelUnderflow { level: usize, needed: usize },

    #[error("scale mismatch: {lhs} vs {rhs}")]
    ScaleMismatch { lhs: f64, rhs: f64 },

    #[error("degree mismatch: expected {expected}, got {got}")]
    DegreeMismatch { expected: usize, got: usize },

    #[error("key not available: {0}")]
    MissingKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("serialization error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),

    #[error("ring degree must be a power of 2 and at least 16, got {0}")]
    InvalidRingDegree(usize),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("modulus mismatch")]
    ModulusMismatch,

    #[error("peer mismatch: {0}")]
    PeerMismatch(String),
}

impl HeError {
    /// Read failures while decoding a buffer become `Serialization` errors.
    pub(crate) fn in_decoding(self) -> Self {
        match self {
            HeError::Io(e) => HeError::Serialization(format!("truncated or unreadable buffer: {e}")),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, HeError>;
