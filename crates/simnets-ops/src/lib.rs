//! Similarity operator for SimNets.
//!
//! For every location of a `[batch, channels, rows, cols]` input the operator
//! compares a local patch with learned templates under an L1 or L2 distance,
//! weights the per-element distances and sums them:
//!
//! ```text
//! output[b, c, i, j] = Σ_{dc, di, dj} weights[c, dc, di, dj]
//!                        · φ(input[b, dc, s_h·i + di - p_h, s_w·j + dj - p_w], templates[c, dc, di, dj])
//! ```
//!
//! - [`shape_fn`]: graph-construction shape inference
//! - [`patch`]: the gather / scatter-add index mapping
//! - [`forward`], [`input_grad`], [`params_grad`]: the kernels
//! - [`reference`]: direct-indexing forward used as an oracle
//! - [`registry`]: operator definitions for a hosting runtime

pub mod attrs;
pub mod error;
pub mod forward;
pub mod geometry;
pub mod input_grad;
pub mod kernel;
pub mod params_grad;
pub mod patch;
pub mod reference;
pub mod registry;
pub mod shape_fn;

pub use attrs::{SimilarityAttrs, SimilarityFunction};
pub use error::{OpError, OpResult};
pub use forward::similarity_forward;
pub use geometry::Geometry;
pub use input_grad::similarity_input_grad;
pub use params_grad::similarity_parameters_grad;
pub use patch::PatchMap;
pub use reference::similarity_forward_ref;
pub use registry::{DType, OpDef, OpRegistry, TensorValue};
pub use shape_fn::{output_size, similarity_shape, Rounding};
