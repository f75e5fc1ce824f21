use log::{debug, warn};
use simnets_core::{Float, PartialShape, Shape, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::{OpError, OpResult};
use crate::shape_fn::{output_size, similarity_shape, Rounding, SIMILARITY_ROUNDING};

/// Fully resolved sliding-window geometry for one kernel invocation.
///
/// Input:     [batch, channels, in_rows, in_cols]
/// Templates: [out_channels, channels, filter_rows, filter_cols]
/// Output:    [batch, out_channels, out_rows, out_cols]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub batch: usize,
    pub channels: usize,
    pub in_rows: usize,
    pub in_cols: usize,
    pub out_channels: usize,
    pub filter_rows: usize,
    pub filter_cols: usize,
    pub stride_rows: usize,
    pub stride_cols: usize,
    pub pad_rows: usize,
    pub pad_cols: usize,
    pub out_rows: usize,
    pub out_cols: usize,
}

impl Geometry {
    /// Resolve the geometry the registered operators use.
    pub fn resolve(input: &Shape, templates: &Shape, attrs: &SimilarityAttrs) -> OpResult<Self> {
        Self::with_rounding(input, templates, attrs, SIMILARITY_ROUNDING)
    }

    /// Resolve the geometry with an explicit rounding policy for the output size.
    pub fn with_rounding(
        input: &Shape,
        templates: &Shape,
        attrs: &SimilarityAttrs,
        rounding: Rounding,
    ) -> OpResult<Self> {
        attrs.validate()?;
        // Same checks, in the same order, as graph construction.
        similarity_shape(&PartialShape::from(input), &PartialShape::from(templates), attrs)?;

        let [batch, channels, in_rows, in_cols] = input.dims4()?;
        let [out_channels, _, filter_rows, filter_cols] = templates.dims4()?;
        let [stride_rows, stride_cols] = attrs.strides_hw()?;
        let [pad_rows, pad_cols] = attrs.padding_hw()?;

        let geometry = Geometry {
            batch,
            channels,
            in_rows,
            in_cols,
            out_channels,
            filter_rows,
            filter_cols,
            stride_rows,
            stride_cols,
            pad_rows,
            pad_cols,
            out_rows: output_size(in_rows, filter_rows, stride_rows, pad_rows, rounding)?,
            out_cols: output_size(in_cols, filter_cols, stride_cols, pad_cols, rounding)?,
        };
        debug!("resolved similarity geometry: {:?}", geometry);
        Ok(geometry)
    }

    /// Resolve and check the `(input, templates, weights)` triple every kernel takes.
    pub fn for_tensors<T: Float>(
        input: &Tensor<T>,
        templates: &Tensor<T>,
        weights: &Tensor<T>,
        attrs: &SimilarityAttrs,
    ) -> OpResult<Self> {
        if weights.shape() != templates.shape() {
            return Err(OpError::DimensionMismatch {
                what: "templates/weights shape".to_string(),
                left: templates.shape().to_string(),
                right: weights.shape().to_string(),
            });
        }
        let geometry = Self::resolve(input.shape(), templates.shape(), attrs)?;
        warn_on_negative_weights(weights);
        Ok(geometry)
    }

    /// Elements in one patch: `channels * filter_rows * filter_cols`.
    pub fn patch_len(&self) -> usize {
        self.channels * self.filter_rows * self.filter_cols
    }

    /// Elements in one input image: `channels * in_rows * in_cols`.
    pub fn image_len(&self) -> usize {
        self.channels * self.in_rows * self.in_cols
    }

    /// Output locations per image and channel: `out_rows * out_cols`.
    pub fn locations(&self) -> usize {
        self.out_rows * self.out_cols
    }

    pub fn output_dims(&self) -> [usize; 4] {
        [self.batch, self.out_channels, self.out_rows, self.out_cols]
    }

    pub fn input_dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.in_rows, self.in_cols]
    }

    /// Check that an upstream gradient has the forward output's shape.
    pub fn check_output_grad<T: Float>(&self, output_grad: &Tensor<T>) -> OpResult<()> {
        let expected = self.output_dims();
        if output_grad.shape().dims() != expected {
            return Err(OpError::DimensionMismatch {
                what: "output gradient shape".to_string(),
                left: Shape::from(&expected[..]).to_string(),
                right: output_grad.shape().to_string(),
            });
        }
        Ok(())
    }
}

/// Negative weights leave the result numerically defined but meaningless;
/// they are reported, not rejected.
fn warn_on_negative_weights<T: Float>(weights: &Tensor<T>) {
    let negative = weights.data().iter().filter(|&&w| w < T::ZERO).count();
    if negative > 0 {
        warn!(
            "similarity weights must be non-negative; {} of {} elements are negative",
            negative,
            weights.numel()
        );
    }
}
