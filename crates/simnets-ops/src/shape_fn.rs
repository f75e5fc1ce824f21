//! Shape inference for the similarity operators.
//!
//! These functions run during graph construction, before any data exists, so
//! they work on [`PartialShape`]s: any dimension may be unknown, and only the
//! statically known ones are checked.

use simnets_core::{Dim, PartialShape};

use crate::attrs::SimilarityAttrs;
use crate::error::{OpError, OpResult};

/// How a trailing, partially covered block is counted along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rounding {
    /// Only blocks that lie entirely inside the padded input are counted.
    Floor,
    /// A final under-full block is counted as long as it starts inside the
    /// input or its leading padding; its missing elements are filled with the
    /// out-of-bounds value.
    Ceil,
}

/// Rounding used by every registered similarity operator.
pub const SIMILARITY_ROUNDING: Rounding = Rounding::Floor;

fn too_large(in_dim: usize, pad: usize) -> OpError {
    OpError::InvalidGeometry(format!(
        "input of size {} with padding {} overflows the index range",
        in_dim, pad
    ))
}

/// `round((in + 2*pad - filter) / stride) + 1` for one spatial axis.
pub fn output_size(
    in_dim: usize,
    filter: usize,
    stride: usize,
    pad: usize,
    rounding: Rounding,
) -> OpResult<usize> {
    if stride == 0 {
        return Err(OpError::InvalidAttribute {
            attr: "strides",
            reason: "stride must be positive".to_string(),
        });
    }
    // Window offsets are computed as signed integers downstream.
    if pad > isize::MAX as usize / 2 || in_dim > isize::MAX as usize / 2 {
        return Err(too_large(in_dim, pad));
    }
    let span = pad
        .checked_mul(2)
        .and_then(|p| p.checked_add(in_dim))
        .filter(|&span| span <= isize::MAX as usize)
        .ok_or_else(|| too_large(in_dim, pad))?;
    if filter == 0 || span < filter {
        return Err(OpError::InvalidGeometry(format!(
            "filter of size {} does not fit input of size {} with padding {}",
            filter, in_dim, pad
        )));
    }
    let steps = span - filter;
    let out = match rounding {
        Rounding::Floor => steps / stride + 1,
        Rounding::Ceil => {
            let out = steps.div_ceil(stride) + 1;
            // The last block must start before the trailing padding.
            let last_start = (out - 1).checked_mul(stride);
            if last_start.map_or(true, |start| start >= in_dim + pad) {
                out - 1
            } else {
                out
            }
        }
    };
    Ok(out)
}

fn output_dim(
    in_dim: Dim,
    filter: Dim,
    stride: usize,
    pad: usize,
    rounding: Rounding,
) -> OpResult<Dim> {
    match (in_dim, filter) {
        (Dim::Known(i), Dim::Known(f)) => Ok(Dim::Known(output_size(i, f, stride, pad, rounding)?)),
        _ => Ok(Dim::Unknown),
    }
}

fn merge_dim(what: &str, a: Dim, b: Dim) -> OpResult<Dim> {
    a.merge(b).map_err(|_| OpError::DimensionMismatch {
        what: what.to_string(),
        left: a.to_string(),
        right: b.to_string(),
    })
}

fn require_rank4(tensor: &'static str, shape: &PartialShape) -> OpResult<()> {
    shape.with_rank(4).map_err(|_| OpError::RankMismatch {
        tensor,
        expected: 4,
        got: shape.ndim(),
    })?;
    Ok(())
}

/// Output shape `[batch, out_channels, out_rows, out_cols]` of the forward
/// operator given the input and templates shapes.
pub fn similarity_shape(
    input: &PartialShape,
    templates: &PartialShape,
    attrs: &SimilarityAttrs,
) -> OpResult<PartialShape> {
    require_rank4("input", input)?;
    require_rank4("templates", templates)?;

    let [stride_rows, stride_cols] = attrs.strides_hw()?;
    let [pad_rows, pad_cols] = attrs.padding_hw()?;
    let [block_rows, block_cols] = attrs.blocks_hw()?;

    let batch = input.dim(0)?;
    let in_rows = input.dim(2)?;
    let in_cols = input.dim(3)?;
    let output_depth = templates.dim(0)?;

    merge_dim("input/templates channels", input.dim(1)?, templates.dim(1)?)?;
    let filter_rows = merge_dim("blocks/templates rows", Dim::Known(block_rows), templates.dim(2)?)?;
    let filter_cols = merge_dim("blocks/templates cols", Dim::Known(block_cols), templates.dim(3)?)?;

    let out_rows = output_dim(in_rows, filter_rows, stride_rows, pad_rows, SIMILARITY_ROUNDING)?;
    let out_cols = output_dim(in_cols, filter_cols, stride_cols, pad_cols, SIMILARITY_ROUNDING)?;

    Ok(PartialShape::new(vec![batch, output_depth, out_rows, out_cols]))
}

/// Forward shape function over the operator's full input list
/// `[input, templates, weights]`; templates and weights must unify.
pub fn forward_shape_fn(
    inputs: &[PartialShape],
    attrs: &SimilarityAttrs,
) -> OpResult<Vec<PartialShape>> {
    let [input, templates, weights] = expect_inputs::<3>(inputs)?;
    require_rank4("weights", weights)?;
    let params = merge_parameters(templates, weights)?;
    Ok(vec![similarity_shape(input, &params, attrs)?])
}

/// The input gradient has the input's shape.
pub fn input_grad_shape_fn(
    inputs: &[PartialShape],
    _attrs: &SimilarityAttrs,
) -> OpResult<Vec<PartialShape>> {
    let [input, _, _, _] = expect_inputs::<4>(inputs)?;
    Ok(vec![input.clone()])
}

/// The parameter gradients mirror the templates and weights shapes.
pub fn parameters_grad_shape_fn(
    inputs: &[PartialShape],
    _attrs: &SimilarityAttrs,
) -> OpResult<Vec<PartialShape>> {
    let [_, templates, weights, _] = expect_inputs::<4>(inputs)?;
    Ok(vec![templates.clone(), weights.clone()])
}

fn merge_parameters(templates: &PartialShape, weights: &PartialShape) -> OpResult<PartialShape> {
    if templates.ndim() != weights.ndim() {
        return Err(OpError::RankMismatch {
            tensor: "weights",
            expected: templates.ndim(),
            got: weights.ndim(),
        });
    }
    templates
        .merge(weights)
        .map_err(|_| OpError::DimensionMismatch {
            what: "templates/weights shape".to_string(),
            left: templates.to_string(),
            right: weights.to_string(),
        })
}

fn expect_inputs<const N: usize>(inputs: &[PartialShape]) -> OpResult<[&PartialShape; N]> {
    if inputs.len() != N {
        return Err(OpError::ArityMismatch {
            op: "shape inference".to_string(),
            expected: N,
            got: inputs.len(),
        });
    }
    Ok(std::array::from_fn(|i| &inputs[i]))
}
