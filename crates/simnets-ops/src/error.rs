use simnets_core::TensorError;
use thiserror::Error;

/// Errors raised by shape inference, attribute validation and kernel evaluation.
///
/// All of them are caller bugs (malformed shapes or attributes) and are raised
/// before any output buffer is produced.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("Attribute `{attr}` must contain {expected} values, but got {got}")]
    AttributeCardinality {
        attr: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("`{tensor}` must be rank {expected}, but got rank {got}")]
    RankMismatch {
        tensor: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Dimension mismatch for {what}: {left} vs {right}")]
    DimensionMismatch {
        what: String,
        left: String,
        right: String,
    },

    #[error("Invalid attribute `{attr}`: {reason}")]
    InvalidAttribute { attr: &'static str, reason: String },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Operator already registered: {0}")]
    DuplicateOperator(String),

    #[error("Operator `{op}` takes {expected} inputs, but got {got}")]
    ArityMismatch {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("Operator `{op}` requires all inputs to share one dtype, got {got:?}")]
    DTypeMismatch { op: String, got: Vec<&'static str> },

    #[error("Attribute parse error: {0}")]
    AttributeParse(#[from] serde_json::Error),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type OpResult<T> = Result<T, OpError>;
