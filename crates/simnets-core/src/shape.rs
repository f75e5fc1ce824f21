use crate::error::{TensorError, TensorResult};

/// Represents the shape of a tensor (dimensions).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Size along a specific axis.
    pub fn dim(&self, axis: usize) -> TensorResult<usize> {
        self.dims.get(axis).copied().ok_or(TensorError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }

    /// Compute row-major (C-order) strides.
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![1usize; self.dims.len()];
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Dimensions of a rank-4 shape as a fixed array.
    pub fn dims4(&self) -> TensorResult<[usize; 4]> {
        match self.dims.as_slice() {
            &[a, b, c, d] => Ok([a, b, c, d]),
            _ => Err(TensorError::RankMismatch {
                expected: 4,
                got: self.ndim(),
            }),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

// ─── Partial shapes ─────────────────────────────────────────────────────────

/// A single dimension as seen during graph construction, where sizes may
/// not be known until data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

impl Dim {
    /// Unify two dimensions. Unknown yields to known; two known sizes must agree.
    pub fn merge(self, other: Dim) -> TensorResult<Dim> {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) if a != b => Err(TensorError::DimensionMismatch(
                format!("{} vs {}", a, b),
            )),
            (Dim::Known(a), _) | (_, Dim::Known(a)) => Ok(Dim::Known(a)),
            (Dim::Unknown, Dim::Unknown) => Ok(Dim::Unknown),
        }
    }
}

impl From<usize> for Dim {
    fn from(v: usize) -> Self {
        Dim::Known(v)
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dim::Known(v) => write!(f, "{}", v),
            Dim::Unknown => write!(f, "?"),
        }
    }
}

/// Shape with a known rank but possibly unknown dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialShape {
    dims: Vec<Dim>,
}

impl PartialShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        PartialShape { dims }
    }

    /// Shape of the given rank with every dimension unknown.
    pub fn unknown(rank: usize) -> Self {
        PartialShape {
            dims: vec![Dim::Unknown; rank],
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> TensorResult<Dim> {
        self.dims.get(axis).copied().ok_or(TensorError::InvalidAxis {
            axis,
            ndim: self.ndim(),
        })
    }

    /// Require an exact rank.
    pub fn with_rank(&self, rank: usize) -> TensorResult<&Self> {
        if self.ndim() != rank {
            return Err(TensorError::RankMismatch {
                expected: rank,
                got: self.ndim(),
            });
        }
        Ok(self)
    }

    /// Dimension-wise merge of two shapes of equal rank.
    pub fn merge(&self, other: &PartialShape) -> TensorResult<PartialShape> {
        if self.ndim() != other.ndim() {
            return Err(TensorError::RankMismatch {
                expected: self.ndim(),
                got: other.ndim(),
            });
        }
        let dims = self
            .dims
            .iter()
            .zip(other.dims.iter())
            .map(|(a, b)| a.merge(*b))
            .collect::<TensorResult<Vec<_>>>()?;
        Ok(PartialShape { dims })
    }
}

impl From<&Shape> for PartialShape {
    fn from(shape: &Shape) -> Self {
        PartialShape {
            dims: shape.dims().iter().map(|&d| Dim::Known(d)).collect(),
        }
    }
}

impl From<Vec<usize>> for PartialShape {
    fn from(dims: Vec<usize>) -> Self {
        PartialShape {
            dims: dims.into_iter().map(Dim::Known).collect(),
        }
    }
}

impl std::fmt::Display for PartialShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![3, 4, 5]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.numel(), 60);
        assert_eq!(s.dim(0).unwrap(), 3);
        assert_eq!(s.dim(2).unwrap(), 5);
        assert!(s.dim(3).is_err());
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(vec![2, 3, 4, 5]);
        assert_eq!(s.strides(), vec![60, 20, 5, 1]);
    }

    #[test]
    fn test_dims4() {
        assert_eq!(Shape::new(vec![1, 2, 3, 4]).dims4().unwrap(), [1, 2, 3, 4]);
        assert_eq!(
            Shape::new(vec![2, 3]).dims4(),
            Err(TensorError::RankMismatch { expected: 4, got: 2 })
        );
    }

    #[test]
    fn test_dim_merge() {
        assert_eq!(Dim::Known(4).merge(Dim::Unknown).unwrap(), Dim::Known(4));
        assert_eq!(Dim::Unknown.merge(Dim::Known(7)).unwrap(), Dim::Known(7));
        assert_eq!(Dim::Unknown.merge(Dim::Unknown).unwrap(), Dim::Unknown);
        assert!(Dim::Known(4).merge(Dim::Known(5)).is_err());
    }

    #[test]
    fn test_partial_shape() {
        let a = PartialShape::new(vec![Dim::Unknown, Dim::Known(3)]);
        let b = PartialShape::from(vec![2, 3]);
        let m = a.merge(&b).unwrap();
        assert_eq!(m, PartialShape::from(vec![2, 3]));
        assert!(a.with_rank(2).is_ok());
        assert!(matches!(
            a.with_rank(4),
            Err(TensorError::RankMismatch { expected: 4, got: 2 })
        ));
        assert_eq!(a.to_string(), "(?, 3)");
    }
}
