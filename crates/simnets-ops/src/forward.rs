use log::debug;
use rayon::prelude::*;
use simnets_core::{Float, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::OpResult;
use crate::geometry::Geometry;
use crate::kernel::SimilarityKernel;
use crate::patch::PatchMap;

/// Similarity forward pass.
///
/// `output[b, c, i, j] = Σ weights[c] · φ(patch[b, i, j], templates[c])`, plus
/// the optional normalization term. Images are processed in parallel; every
/// output cell is written exactly once, so results are bit-reproducible.
pub fn similarity_forward<T: Float>(
    input: &Tensor<T>,
    templates: &Tensor<T>,
    weights: &Tensor<T>,
    attrs: &SimilarityAttrs,
) -> OpResult<Tensor<T>> {
    let geometry = Geometry::for_tensors(input, templates, weights, attrs)?;
    let kernel = SimilarityKernel::<T>::new(attrs);
    debug!(
        "similarity forward: {} {} images, {} locations, {} templates",
        T::NAME,
        geometry.batch,
        geometry.locations(),
        geometry.out_channels
    );

    let output_len: usize = geometry.output_dims().iter().product();
    if output_len == 0 {
        return Ok(Tensor::zeros(geometry.output_dims().to_vec()));
    }

    let map = PatchMap::new(&geometry);
    let patch_len = geometry.patch_len();
    let image_len = geometry.image_len();
    let locations = geometry.locations();
    let per_image = geometry.out_channels * locations;

    let mut output = vec![T::ZERO; output_len];
    output
        .par_chunks_mut(per_image)
        .enumerate()
        .for_each(|(b, out)| {
            let image = &input.data()[b * image_len..(b + 1) * image_len];
            let mut patch = vec![T::ZERO; patch_len];
            for loc in 0..locations {
                map.gather(image, loc, kernel.out_of_bounds, &mut patch);
                for c in 0..geometry.out_channels {
                    let params = c * patch_len..(c + 1) * patch_len;
                    out[c * locations + loc] = kernel.respond(
                        &patch,
                        &templates.data()[params.clone()],
                        &weights.data()[params],
                    );
                }
            }
        });

    Ok(Tensor::new(output, geometry.output_dims().to_vec())?)
}
