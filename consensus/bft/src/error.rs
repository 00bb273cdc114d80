use thiserror::Error;

/// Everything that can go wrong while the Context processes a message or
/// drives the block chain, modeled after `consensus/net`'s `NetworkError`.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("unknown validator")]
    UnknownValidator,
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("wrong proposer for round {round}: expected {expected}, got {got}")]
    WrongProposer {
        round: u32,
        expected: String,
        got: String,
    },
    #[error("validator {validator} equivocated")]
    Equivocation { validator: String },
    #[error("invalid block header: {0}")]
    InvalidBlockHeader(String),
    #[error("invalid block content: {0}")]
    InvalidBlockContent(String),
    #[error("append to block chain failed: {0}")]
    AppendFailed(String),
    #[error("context cancelled")]
    Cancelled,
}
