use thiserror::Error;

/// Core error type for tensor construction and indexing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Rank mismatch: expected rank {expected}, got rank {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("Index out of bounds: index {index} for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("Invalid axis: {axis} for tensor with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

pub type TensorResult<T> = Result<T, TensorError>;
