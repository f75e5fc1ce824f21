//! Per-element similarity math shared by the forward and gradient kernels.

use simnets_core::Float;

use crate::attrs::{SimilarityAttrs, SimilarityFunction};

/// φ(x, t): negative L1 or squared-L2 distance.
#[inline]
pub fn phi<T: Float>(function: SimilarityFunction, x: T, t: T) -> T {
    let d = x - t;
    match function {
        SimilarityFunction::L1 => -d.abs(),
        SimilarityFunction::L2 => -(d * d),
    }
}

/// ∂φ/∂x. The derivative with respect to the template is its negation.
#[inline]
pub fn dphi_dx<T: Float>(function: SimilarityFunction, x: T, t: T) -> T {
    let d = x - t;
    match function {
        SimilarityFunction::L1 => -d.sign(),
        SimilarityFunction::L2 => -(T::TWO * d),
    }
}

/// Additive log-normalizer contributed by each counted patch element:
/// `-0.5 * ln(2π + fudge)`. Only L2 responses are normalized.
pub fn normalization_per_element<T: Float>(attrs: &SimilarityAttrs) -> Option<T> {
    if !attrs.normalization_term || attrs.similarity_function != SimilarityFunction::L2 {
        return None;
    }
    let two_pi = 2.0 * std::f64::consts::PI;
    Some(T::from_f64(-0.5 * (two_pi + attrs.normalization_term_fudge).ln()))
}

/// The attribute-derived parts of the per-location computation.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityKernel<T: Float> {
    pub function: SimilarityFunction,
    pub ignore_nan: bool,
    pub normalization: Option<T>,
    pub out_of_bounds: T,
}

impl<T: Float> SimilarityKernel<T> {
    pub fn new(attrs: &SimilarityAttrs) -> Self {
        SimilarityKernel {
            function: attrs.similarity_function,
            ignore_nan: attrs.ignore_nan_input,
            normalization: normalization_per_element(attrs),
            out_of_bounds: T::from_f64(attrs.out_of_bounds_value),
        }
    }

    /// Whether a patch element takes part in the sum.
    #[inline]
    pub fn counts(&self, x: T) -> bool {
        !(self.ignore_nan && x.is_nan())
    }

    /// Σ w·φ(x, t) over the counted elements of one patch, plus the
    /// normalization term for the number of counted elements.
    pub fn respond(&self, patch: &[T], templates: &[T], weights: &[T]) -> T {
        let mut sum = T::ZERO;
        let mut counted = 0usize;
        for ((&x, &t), &w) in patch.iter().zip(templates).zip(weights) {
            if !self.counts(x) {
                continue;
            }
            sum += w * phi(self.function, x, t);
            counted += 1;
        }
        match self.normalization {
            Some(per_element) => sum + per_element * T::from_usize(counted),
            None => sum,
        }
    }
}
