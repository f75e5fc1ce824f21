use log::debug;
use rayon::prelude::*;
use simnets_core::{Float, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::OpResult;
use crate::geometry::Geometry;
use crate::kernel::{dphi_dx, SimilarityKernel};
use crate::patch::PatchMap;

/// Gradient of the similarity output with respect to the input.
///
/// Each output location's local derivative, scaled by
/// `weights[c] * output_grad[b, c, i, j]`, is scattered back through the
/// patch map. Overlapping patches only overlap within one image, so the work
/// is partitioned per image and needs no synchronization. Out-of-bounds and
/// ignored NaN elements receive nothing.
pub fn similarity_input_grad<T: Float>(
    input: &Tensor<T>,
    templates: &Tensor<T>,
    weights: &Tensor<T>,
    output_grad: &Tensor<T>,
    attrs: &SimilarityAttrs,
) -> OpResult<Tensor<T>> {
    let geometry = Geometry::for_tensors(input, templates, weights, attrs)?;
    geometry.check_output_grad(output_grad)?;
    let kernel = SimilarityKernel::<T>::new(attrs);
    debug!(
        "similarity input grad: {} {} images, {} locations",
        T::NAME,
        geometry.batch,
        geometry.locations()
    );

    let image_len = geometry.image_len();
    let mut grad = vec![T::ZERO; input.numel()];
    if grad.is_empty() {
        return Ok(Tensor::zeros(input.shape_vec()));
    }

    let map = PatchMap::new(&geometry);
    let patch_len = geometry.patch_len();
    let locations = geometry.locations();
    let per_image = geometry.out_channels * locations;

    grad.par_chunks_mut(image_len)
        .enumerate()
        .for_each(|(b, image_grad)| {
            let image = &input.data()[b * image_len..(b + 1) * image_len];
            let upstream = &output_grad.data()[b * per_image..(b + 1) * per_image];
            let mut patch = vec![T::ZERO; patch_len];
            let mut local = vec![T::ZERO; patch_len];

            for loc in 0..locations {
                map.gather(image, loc, kernel.out_of_bounds, &mut patch);
                local.iter_mut().for_each(|v| *v = T::ZERO);

                for c in 0..geometry.out_channels {
                    let g = upstream[c * locations + loc];
                    let t = &templates.data()[c * patch_len..(c + 1) * patch_len];
                    let w = &weights.data()[c * patch_len..(c + 1) * patch_len];
                    for e in 0..patch_len {
                        let x = patch[e];
                        if !kernel.counts(x) {
                            continue;
                        }
                        local[e] += w[e] * dphi_dx(kernel.function, x, t[e]) * g;
                    }
                }

                map.scatter_add(loc, &local, image_grad);
            }
        });

    Ok(Tensor::new(grad, input.shape_vec())?)
}
