pub mod tensor;
pub mod shape;
pub mod dtype;
pub mod error;

pub use tensor::Tensor;
pub use shape::{Dim, PartialShape, Shape};
pub use dtype::Float;
pub use error::{TensorError, TensorResult};
