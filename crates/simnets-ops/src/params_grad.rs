use log::debug;
use rayon::prelude::*;
use simnets_core::{Float, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::OpResult;
use crate::geometry::Geometry;
use crate::kernel::{dphi_dx, phi, SimilarityKernel};
use crate::patch::PatchMap;

/// Gradients of the similarity output with respect to templates and weights.
///
/// ```text
/// templates_grad[c, e] = Σ_{b,i,j} weights[c, e] · ∂φ/∂t · output_grad[b, c, i, j]
/// weights_grad[c, e]   = Σ_{b,i,j} φ(patch[b, i, j][e], templates[c, e]) · output_grad[b, c, i, j]
/// ```
///
/// Both reduce over the batch and every output location. Images are folded
/// into per-job accumulators which are summed at the end. Out-of-bounds
/// elements contribute through their fill value; ignored NaN elements
/// contribute nothing.
pub fn similarity_parameters_grad<T: Float>(
    input: &Tensor<T>,
    templates: &Tensor<T>,
    weights: &Tensor<T>,
    output_grad: &Tensor<T>,
    attrs: &SimilarityAttrs,
) -> OpResult<(Tensor<T>, Tensor<T>)> {
    let geometry = Geometry::for_tensors(input, templates, weights, attrs)?;
    geometry.check_output_grad(output_grad)?;
    let kernel = SimilarityKernel::<T>::new(attrs);
    debug!(
        "similarity parameters grad: {} {} images, {} templates",
        T::NAME,
        geometry.batch,
        geometry.out_channels
    );

    let params_len = templates.numel();
    let map = PatchMap::new(&geometry);
    let patch_len = geometry.patch_len();
    let image_len = geometry.image_len();
    let locations = geometry.locations();
    let per_image = geometry.out_channels * locations;
    let zeros = || (vec![T::ZERO; params_len], vec![T::ZERO; params_len]);

    let (templates_grad, weights_grad) = (0..geometry.batch)
        .into_par_iter()
        .fold(zeros, |(mut t_grad, mut w_grad), b| {
            let image = &input.data()[b * image_len..(b + 1) * image_len];
            let upstream = &output_grad.data()[b * per_image..(b + 1) * per_image];
            let mut patch = vec![T::ZERO; patch_len];

            for loc in 0..locations {
                map.gather(image, loc, kernel.out_of_bounds, &mut patch);
                for c in 0..geometry.out_channels {
                    let g = upstream[c * locations + loc];
                    let base = c * patch_len;
                    for e in 0..patch_len {
                        let x = patch[e];
                        if !kernel.counts(x) {
                            continue;
                        }
                        let t = templates.data()[base + e];
                        let w = weights.data()[base + e];
                        // ∂φ/∂t = -∂φ/∂x
                        t_grad[base + e] -= w * dphi_dx(kernel.function, x, t) * g;
                        w_grad[base + e] += phi(kernel.function, x, t) * g;
                    }
                }
            }
            (t_grad, w_grad)
        })
        .reduce(zeros, |(mut t_acc, mut w_acc), (t_part, w_part)| {
            for (acc, v) in t_acc.iter_mut().zip(t_part) {
                *acc += v;
            }
            for (acc, v) in w_acc.iter_mut().zip(w_part) {
                *acc += v;
            }
            (t_acc, w_acc)
        });

    Ok((
        Tensor::new(templates_grad, templates.shape_vec())?,
        Tensor::new(weights_grad, weights.shape_vec())?,
    ))
}
