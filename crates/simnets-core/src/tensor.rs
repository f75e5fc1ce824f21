use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

/// Dense N-dimensional tensor.
///
/// Stores data in a flat contiguous `Vec<T>` with row-major (C-order) layout,
/// which is the buffer layout the similarity kernels read and write.
#[derive(Debug, Clone)]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Tensor::full(shape, T::ZERO)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: Vec<usize>) -> Self {
        Tensor::full(shape, T::ONE)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![value; s.numel()],
            shape: s,
        }
    }

    /// Create a tensor from a generator called with each row-major flat index.
    pub fn from_fn<F: FnMut(usize) -> T>(shape: Vec<usize>, f: F) -> Self {
        let s = Shape::new(shape);
        let data = (0..s.numel()).map(f).collect();
        Tensor { data, shape: s }
    }

    /// Random tensor with uniform distribution in [0, 1).
    pub fn rand(shape: Vec<usize>, seed: Option<u64>) -> Self {
        let s = Shape::new(shape);
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let data: Vec<T> = (0..s.numel())
            .map(|_| T::from_f64(rand::Rng::gen::<f64>(&mut rng)))
            .collect();
        Tensor { data, shape: s }
    }

    /// Random tensor with standard normal distribution (Box-Muller).
    pub fn randn(shape: Vec<usize>, seed: Option<u64>) -> Self {
        let s = Shape::new(shape);
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let n = s.numel();
        let mut data = Vec::with_capacity(n + 1);

        while data.len() < n {
            let u1: f64 = rand::Rng::gen::<f64>(&mut rng).max(1e-10);
            let u2: f64 = rand::Rng::gen::<f64>(&mut rng);
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            data.push(T::from_f64(r * theta.cos()));
            data.push(T::from_f64(r * theta.sin()));
        }
        data.truncate(n);
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Dimensions of a rank-4 tensor.
    pub fn dims4(&self) -> TensorResult<[usize; 4]> {
        self.shape.dims4()
    }

    /// Flat row-major offset of a multi-dimensional index.
    pub fn offset(&self, indices: &[usize]) -> TensorResult<usize> {
        if indices.len() != self.ndim() {
            return Err(TensorError::DimensionMismatch(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        let strides = self.shape.strides();
        let mut offset = 0;
        for (i, &idx) in indices.iter().enumerate() {
            let dim_size = self.shape.dim(i)?;
            if idx >= dim_size {
                return Err(TensorError::IndexOutOfBounds {
                    index: idx,
                    axis: i,
                    size: dim_size,
                });
            }
            offset += idx * strides[i];
        }
        Ok(offset)
    }

    /// Get a single element.
    pub fn get(&self, indices: &[usize]) -> TensorResult<T> {
        let offset = self.offset(indices)?;
        Ok(self.data[offset])
    }

    /// Set a single element.
    pub fn set(&mut self, indices: &[usize], value: T) -> TensorResult<()> {
        let offset = self.offset(indices)?;
        self.data[offset] = value;
        Ok(())
    }

    // ─── Reductions ─────────────────────────────────────────────────────────

    /// Inner product of two tensors with identical shapes.
    pub fn dot(&self, other: &Tensor<T>) -> TensorResult<T> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| a * b)
            .sum())
    }

    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|x| x.is_nan())
    }

    /// Largest absolute element-wise difference; `None` on shape mismatch.
    pub fn max_abs_diff(&self, other: &Tensor<T>) -> Option<f64> {
        if self.shape != other.shape {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| (a.to_f64() - b.to_f64()).abs())
                .fold(0.0, f64::max),
        )
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

// ─── Display ────────────────────────────────────────────────────────────────

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor([")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if i > 6 {
                write!(f, "...")?;
                break;
            }
            write!(f, "{:.4}", v)?;
        }
        write!(f, "], shape={})", self.shape)
    }
}
