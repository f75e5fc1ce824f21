use simnets_core::{Float, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::OpResult;
use crate::geometry::Geometry;
use crate::kernel::{normalization_per_element, phi};

/// Reference similarity forward pass: same contract as
/// [`similarity_forward`](crate::forward::similarity_forward), computed
/// serially straight from the defining sum with its own coordinate
/// arithmetic. Slow; used to cross-check the fast kernel.
pub fn similarity_forward_ref<T: Float>(
    input: &Tensor<T>,
    templates: &Tensor<T>,
    weights: &Tensor<T>,
    attrs: &SimilarityAttrs,
) -> OpResult<Tensor<T>> {
    let g = Geometry::for_tensors(input, templates, weights, attrs)?;
    let normalization = normalization_per_element::<T>(attrs);
    let fill = T::from_f64(attrs.out_of_bounds_value);

    let mut output = Tensor::zeros(g.output_dims().to_vec());
    for b in 0..g.batch {
        for c in 0..g.out_channels {
            for i in 0..g.out_rows {
                for j in 0..g.out_cols {
                    let mut sum = T::ZERO;
                    let mut counted = 0usize;
                    for dc in 0..g.channels {
                        for di in 0..g.filter_rows {
                            for dj in 0..g.filter_cols {
                                let row = (g.stride_rows * i + di) as isize - g.pad_rows as isize;
                                let col = (g.stride_cols * j + dj) as isize - g.pad_cols as isize;
                                let x = if row < 0
                                    || col < 0
                                    || row as usize >= g.in_rows
                                    || col as usize >= g.in_cols
                                {
                                    fill
                                } else {
                                    input.get(&[b, dc, row as usize, col as usize])?
                                };
                                if attrs.ignore_nan_input && x.is_nan() {
                                    continue;
                                }
                                let t = templates.get(&[c, dc, di, dj])?;
                                let w = weights.get(&[c, dc, di, dj])?;
                                sum += w * phi(attrs.similarity_function, x, t);
                                counted += 1;
                            }
                        }
                    }
                    if let Some(per_element) = normalization {
                        sum += per_element * T::from_usize(counted);
                    }
                    output.set(&[b, c, i, j], sum)?;
                }
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::SimilarityFunction;
    use crate::forward::similarity_forward;

    #[test]
    fn test_matches_fast_forward() {
        let input: Tensor<f64> = Tensor::randn(vec![2, 3, 7, 6], Some(11));
        let templates: Tensor<f64> = Tensor::randn(vec![4, 3, 3, 2], Some(12));
        let weights: Tensor<f64> = Tensor::rand(vec![4, 3, 3, 2], Some(13));

        for function in [SimilarityFunction::L1, SimilarityFunction::L2] {
            let attrs = SimilarityAttrs::default()
                .with_similarity_function(function)
                .with_blocks(&[3, 2])
                .with_strides(&[2, 1])
                .with_padding(&[1, 2])
                .with_out_of_bounds_value(0.25)
                .with_normalization_term(true, 0.001);
            let fast = similarity_forward(&input, &templates, &weights, &attrs).unwrap();
            let slow = similarity_forward_ref(&input, &templates, &weights, &attrs).unwrap();
            assert_eq!(fast.shape_vec(), slow.shape_vec());
            assert!(fast.max_abs_diff(&slow).unwrap() < 1e-12);
        }
    }
}
