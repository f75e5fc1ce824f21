//! Operator attributes.
//!
//! Attributes arrive from the hosting runtime as an already-parsed map; this
//! module owns their schema, their defaults and their validation. List
//! attributes are kept exactly as parsed (signed, any length) so that
//! cardinality and sign problems surface as typed errors rather than parse
//! failures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

/// Per-element distance kernel φ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimilarityFunction {
    /// φ(x, t) = -|x - t|
    L1,
    /// φ(x, t) = -(x - t)²
    L2,
}

impl fmt::Display for SimilarityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityFunction::L1 => write!(f, "L1"),
            SimilarityFunction::L2 => write!(f, "L2"),
        }
    }
}

impl FromStr for SimilarityFunction {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "L1" => Ok(SimilarityFunction::L1),
            "L2" => Ok(SimilarityFunction::L2),
            other => Err(OpError::InvalidAttribute {
                attr: "similarity_function",
                reason: format!("expected one of 'L1', 'L2', got '{}'", other),
            }),
        }
    }
}

/// Attribute set shared by the forward, reference and gradient operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityAttrs {
    pub similarity_function: SimilarityFunction,
    /// Patch height and width; must match the templates' spatial extent.
    pub blocks: Vec<i64>,
    pub strides: Vec<i64>,
    pub padding: Vec<i64>,
    /// Add the Gaussian log-normalizer to L2 responses.
    pub normalization_term: bool,
    pub normalization_term_fudge: f64,
    /// Exclude NaN patch elements from the sum and from the element count.
    pub ignore_nan_input: bool,
    /// Fill value for patch elements that fall outside the input.
    pub out_of_bounds_value: f64,
}

impl Default for SimilarityAttrs {
    fn default() -> Self {
        SimilarityAttrs {
            similarity_function: SimilarityFunction::L2,
            blocks: vec![3, 3],
            strides: vec![2, 2],
            padding: vec![0, 0],
            normalization_term: false,
            normalization_term_fudge: 0.001,
            ignore_nan_input: false,
            out_of_bounds_value: 0.0,
        }
    }
}

impl SimilarityAttrs {
    /// Parse an attribute map. Missing entries take their defaults; unknown
    /// entries are rejected.
    pub fn from_json(value: &serde_json::Value) -> OpResult<Self> {
        let attrs = SimilarityAttrs::deserialize(value)?;
        Ok(attrs)
    }

    pub fn to_json(&self) -> OpResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn with_similarity_function(mut self, f: SimilarityFunction) -> Self {
        self.similarity_function = f;
        self
    }

    pub fn with_blocks(mut self, blocks: &[i64]) -> Self {
        self.blocks = blocks.to_vec();
        self
    }

    pub fn with_strides(mut self, strides: &[i64]) -> Self {
        self.strides = strides.to_vec();
        self
    }

    pub fn with_padding(mut self, padding: &[i64]) -> Self {
        self.padding = padding.to_vec();
        self
    }

    pub fn with_normalization_term(mut self, enabled: bool, fudge: f64) -> Self {
        self.normalization_term = enabled;
        self.normalization_term_fudge = fudge;
        self
    }

    pub fn with_ignore_nan_input(mut self, enabled: bool) -> Self {
        self.ignore_nan_input = enabled;
        self
    }

    pub fn with_out_of_bounds_value(mut self, value: f64) -> Self {
        self.out_of_bounds_value = value;
        self
    }

    /// Validated `[stride_h, stride_w]`, both strictly positive.
    pub fn strides_hw(&self) -> OpResult<[usize; 2]> {
        pair("strides", &self.strides, 1)
    }

    /// Validated `[pad_h, pad_w]`, both non-negative.
    pub fn padding_hw(&self) -> OpResult<[usize; 2]> {
        pair("padding", &self.padding, 0)
    }

    /// Validated `[block_h, block_w]`, both strictly positive.
    pub fn blocks_hw(&self) -> OpResult<[usize; 2]> {
        pair("blocks", &self.blocks, 1)
    }

    /// Checks every attribute that does not depend on tensor shapes.
    pub fn validate(&self) -> OpResult<()> {
        self.strides_hw()?;
        self.padding_hw()?;
        self.blocks_hw()?;
        let fudge = self.normalization_term_fudge;
        if !fudge.is_finite() || fudge < 0.0 {
            return Err(OpError::InvalidAttribute {
                attr: "normalization_term_fudge",
                reason: format!("must be finite and non-negative, got {}", fudge),
            });
        }
        Ok(())
    }
}

fn pair(attr: &'static str, values: &[i64], min: i64) -> OpResult<[usize; 2]> {
    if values.len() != 2 {
        return Err(OpError::AttributeCardinality {
            attr,
            expected: 2,
            got: values.len(),
        });
    }
    let mut out = [0usize; 2];
    for (slot, &v) in out.iter_mut().zip(values) {
        if v < min {
            return Err(OpError::InvalidAttribute {
                attr,
                reason: format!("values must be >= {}, got {:?}", min, values),
            });
        }
        *slot = usize::try_from(v).map_err(|_| OpError::InvalidAttribute {
            attr,
            reason: format!("value {} does not fit the platform index type", v),
        })?;
    }
    Ok(out)
}
