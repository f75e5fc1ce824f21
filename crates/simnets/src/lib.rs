//! # simnets
//!
//! SimNets similarity layers in Rust.
//!
//! ## Modules
//!
//! - **core**: Dense 4-D tensors, static and partially-known shapes, float element types
//! - **ops**: The similarity operator: attributes, shape inference, forward and
//!   gradient kernels, and an operator registry for hosting runtimes

/// Tensors and shapes.
pub use simnets_core as core;

/// Similarity operator and its gradients.
pub use simnets_ops as ops;
