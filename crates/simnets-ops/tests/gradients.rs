//! Consistency between the forward pass and both gradient kernels.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use simnets_core::Tensor;
use simnets_ops::{
    similarity_forward, similarity_input_grad, similarity_parameters_grad, SimilarityAttrs,
    SimilarityFunction,
};

const STEP: f64 = 1e-6;

struct Problem {
    input: Tensor<f64>,
    templates: Tensor<f64>,
    weights: Tensor<f64>,
    upstream: Tensor<f64>,
    attrs: SimilarityAttrs,
}

impl Problem {
    fn new(function: SimilarityFunction, seed: u64) -> Self {
        let attrs = SimilarityAttrs::default()
            .with_similarity_function(function)
            .with_blocks(&[3, 2])
            .with_strides(&[2, 1])
            .with_padding(&[1, 1])
            .with_out_of_bounds_value(0.3)
            .with_normalization_term(true, 0.001);
        let input = Tensor::randn(vec![2, 3, 6, 5], Some(seed));
        let templates = Tensor::randn(vec![4, 3, 3, 2], Some(seed + 1));
        let weights = Tensor::rand(vec![4, 3, 3, 2], Some(seed + 2));
        let output = similarity_forward(&input, &templates, &weights, &attrs).unwrap();
        let upstream = Tensor::randn(output.shape_vec(), Some(seed + 3));
        Problem {
            input,
            templates,
            weights,
            upstream,
            attrs,
        }
    }

    /// Σ upstream ⊙ output
    fn loss(&self, input: &Tensor<f64>, templates: &Tensor<f64>, weights: &Tensor<f64>) -> f64 {
        let output = similarity_forward(input, templates, weights, &self.attrs).unwrap();
        output.dot(&self.upstream).unwrap()
    }
}

fn perturbed(t: &Tensor<f64>, index: usize, delta: f64) -> Tensor<f64> {
    let mut out = t.clone();
    out.data_mut()[index] += delta;
    out
}

fn along(t: &Tensor<f64>, direction: &Tensor<f64>, scale: f64) -> Tensor<f64> {
    let mut out = t.clone();
    for (v, d) in out.data_mut().iter_mut().zip(direction.data()) {
        *v += scale * d;
    }
    out
}

fn check_input_grad(function: SimilarityFunction) {
    let p = Problem::new(function, 7);
    let grad =
        similarity_input_grad(&p.input, &p.templates, &p.weights, &p.upstream, &p.attrs).unwrap();
    assert_eq!(grad.shape_vec(), p.input.shape_vec());

    for e in 0..p.input.numel() {
        let plus = p.loss(&perturbed(&p.input, e, STEP), &p.templates, &p.weights);
        let minus = p.loss(&perturbed(&p.input, e, -STEP), &p.templates, &p.weights);
        let numeric = (plus - minus) / (2.0 * STEP);
        assert_relative_eq!(numeric, grad.data()[e], epsilon = 1e-5, max_relative = 1e-3);
    }
}

#[test]
fn test_input_grad_matches_finite_differences_l2() {
    check_input_grad(SimilarityFunction::L2);
}

#[test]
fn test_input_grad_matches_finite_differences_l1() {
    check_input_grad(SimilarityFunction::L1);
}

fn check_parameters_grad(function: SimilarityFunction) {
    let p = Problem::new(function, 21);
    let (t_grad, w_grad) =
        similarity_parameters_grad(&p.input, &p.templates, &p.weights, &p.upstream, &p.attrs)
            .unwrap();
    assert_eq!(t_grad.shape_vec(), p.templates.shape_vec());
    assert_eq!(w_grad.shape_vec(), p.weights.shape_vec());

    // First-order change along a random direction equals <grad, direction>.
    let direction: Tensor<f64> = Tensor::randn(p.templates.shape_vec(), Some(99));

    let plus = p.loss(&p.input, &along(&p.templates, &direction, STEP), &p.weights);
    let minus = p.loss(&p.input, &along(&p.templates, &direction, -STEP), &p.weights);
    let numeric = (plus - minus) / (2.0 * STEP);
    assert_relative_eq!(numeric, t_grad.dot(&direction).unwrap(), epsilon = 1e-5, max_relative = 1e-3);

    let plus = p.loss(&p.input, &p.templates, &along(&p.weights, &direction, STEP));
    let minus = p.loss(&p.input, &p.templates, &along(&p.weights, &direction, -STEP));
    let numeric = (plus - minus) / (2.0 * STEP);
    assert_relative_eq!(numeric, w_grad.dot(&direction).unwrap(), epsilon = 1e-5, max_relative = 1e-3);

    // And element-wise for a handful of coordinates.
    for e in [0, 5, 17, 40, 71] {
        let plus = p.loss(&p.input, &perturbed(&p.templates, e, STEP), &p.weights);
        let minus = p.loss(&p.input, &perturbed(&p.templates, e, -STEP), &p.weights);
        assert_relative_eq!(
            (plus - minus) / (2.0 * STEP),
            t_grad.data()[e],
            epsilon = 1e-5,
            max_relative = 1e-3
        );
    }
}

#[test]
fn test_parameters_grad_transpose_property_l2() {
    check_parameters_grad(SimilarityFunction::L2);
}

#[test]
fn test_parameters_grad_transpose_property_l1() {
    check_parameters_grad(SimilarityFunction::L1);
}

#[test]
fn test_weights_grad_is_exact_for_linear_dependence() {
    // Without normalization the output is linear in the weights.
    let p = Problem::new(SimilarityFunction::L2, 3);
    let attrs = p.attrs.clone().with_normalization_term(false, 0.0);
    let (_, w_grad) =
        similarity_parameters_grad(&p.input, &p.templates, &p.weights, &p.upstream, &attrs).unwrap();
    let out = similarity_forward(&p.input, &p.templates, &p.weights, &attrs).unwrap();
    assert_relative_eq!(
        w_grad.dot(&p.weights).unwrap(),
        out.dot(&p.upstream).unwrap(),
        max_relative = 1e-10
    );
}

#[test]
fn test_forward_is_deterministic() {
    let p = Problem::new(SimilarityFunction::L2, 5);
    let a = similarity_forward(&p.input, &p.templates, &p.weights, &p.attrs).unwrap();
    let b = similarity_forward(&p.input, &p.templates, &p.weights, &p.attrs).unwrap();
    let bits = |t: &Tensor<f64>| t.data().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a), bits(&b));
}

#[test]
fn test_nan_marginalization() {
    // Non-overlapping 2x2 blocks over one channel: input (1, 2) belongs to a
    // single patch at block position (1, 0).
    let attrs = SimilarityAttrs::default()
        .with_blocks(&[2, 2])
        .with_strides(&[2, 2])
        .with_ignore_nan_input(true);
    let input: Tensor<f64> = Tensor::randn(vec![1, 1, 4, 4], Some(31));
    let templates: Tensor<f64> = Tensor::randn(vec![1, 1, 2, 2], Some(32));
    let weights: Tensor<f64> = Tensor::rand(vec![1, 1, 2, 2], Some(33));
    let upstream: Tensor<f64> = Tensor::randn(vec![1, 1, 2, 2], Some(34));

    let mut with_nan = input.clone();
    with_nan.set(&[0, 0, 1, 2], f64::NAN).unwrap();
    // Same element set to the template value it is compared with: φ = 0, φ' = 0.
    let mut neutral = input.clone();
    neutral
        .set(&[0, 0, 1, 2], templates.get(&[0, 0, 1, 0]).unwrap())
        .unwrap();

    let out_nan = similarity_forward(&with_nan, &templates, &weights, &attrs).unwrap();
    let out_neutral = similarity_forward(&neutral, &templates, &weights, &attrs).unwrap();
    assert!(!out_nan.has_nan());
    assert_eq!(out_nan, out_neutral);

    let g_nan = similarity_input_grad(&with_nan, &templates, &weights, &upstream, &attrs).unwrap();
    let g_neutral =
        similarity_input_grad(&neutral, &templates, &weights, &upstream, &attrs).unwrap();
    assert_eq!(g_nan.get(&[0, 0, 1, 2]).unwrap(), 0.0);
    assert!(g_nan.max_abs_diff(&g_neutral).unwrap() < 1e-15);

    let (t_nan, w_nan) =
        similarity_parameters_grad(&with_nan, &templates, &weights, &upstream, &attrs).unwrap();
    let (t_neutral, w_neutral) =
        similarity_parameters_grad(&neutral, &templates, &weights, &upstream, &attrs).unwrap();
    assert!(t_nan.max_abs_diff(&t_neutral).unwrap() < 1e-15);
    assert!(w_nan.max_abs_diff(&w_neutral).unwrap() < 1e-15);

    // With the normalization term the NaN patch counts one element fewer.
    let normalized = attrs.clone().with_normalization_term(true, 0.0);
    let out_nan = similarity_forward(&with_nan, &templates, &weights, &normalized).unwrap();
    let out_neutral = similarity_forward(&neutral, &templates, &weights, &normalized).unwrap();
    let per_element = -0.5 * (2.0 * std::f64::consts::PI).ln();
    assert_abs_diff_eq!(
        out_nan.get(&[0, 0, 0, 1]).unwrap() - out_neutral.get(&[0, 0, 0, 1]).unwrap(),
        -per_element,
        epsilon = 1e-12
    );
    assert_eq!(out_nan.get(&[0, 0, 1, 1]).unwrap(), out_neutral.get(&[0, 0, 1, 1]).unwrap());
}

#[test]
fn test_nan_out_of_bounds_value_marginalizes_padding() {
    let attrs = SimilarityAttrs::default()
        .with_strides(&[1, 1])
        .with_padding(&[1, 1])
        .with_ignore_nan_input(true)
        .with_out_of_bounds_value(f64::NAN);
    let input: Tensor<f64> = Tensor::randn(vec![1, 2, 4, 4], Some(41));
    let templates: Tensor<f64> = Tensor::randn(vec![3, 2, 3, 3], Some(42));
    let weights: Tensor<f64> = Tensor::rand(vec![3, 2, 3, 3], Some(43));
    let upstream: Tensor<f64> = Tensor::randn(vec![1, 3, 4, 4], Some(44));

    let out = similarity_forward(&input, &templates, &weights, &attrs).unwrap();
    assert!(!out.has_nan());
    let grad = similarity_input_grad(&input, &templates, &weights, &upstream, &attrs).unwrap();
    assert!(!grad.has_nan());
    let (t_grad, w_grad) =
        similarity_parameters_grad(&input, &templates, &weights, &upstream, &attrs).unwrap();
    assert!(!t_grad.has_nan());
    assert!(!w_grad.has_nan());
}

#[test]
fn test_out_of_bounds_value_only_changes_boundary_outputs() {
    let base = SimilarityAttrs::default()
        .with_strides(&[1, 1])
        .with_padding(&[1, 1])
        .with_out_of_bounds_value(0.0);
    let other = base.clone().with_out_of_bounds_value(5.0);
    let input: Tensor<f64> = Tensor::randn(vec![1, 1, 6, 6], Some(51));
    let templates: Tensor<f64> = Tensor::randn(vec![2, 1, 3, 3], Some(52));
    let weights: Tensor<f64> = Tensor::full(vec![2, 1, 3, 3], 0.5);

    let a = similarity_forward(&input, &templates, &weights, &base).unwrap();
    let b = similarity_forward(&input, &templates, &weights, &other).unwrap();
    assert_eq!(a.shape_vec(), vec![1, 2, 6, 6]);

    for c in 0..2 {
        for i in 0..6 {
            for j in 0..6 {
                let boundary = i == 0 || j == 0 || i == 5 || j == 5;
                let (x, y) = (a.get(&[0, c, i, j]).unwrap(), b.get(&[0, c, i, j]).unwrap());
                if boundary {
                    assert_ne!(x, y, "boundary output ({}, {}, {}) should change", c, i, j);
                } else {
                    assert_eq!(x, y, "interior output ({}, {}, {}) should not change", c, i, j);
                }
            }
        }
    }
}

#[test]
fn test_out_of_bounds_fill_is_used_exactly() {
    // Single 3x3 patch over a 1x1 input with padding 1: eight elements are fill.
    let attrs = SimilarityAttrs::default()
        .with_padding(&[1, 1])
        .with_out_of_bounds_value(2.5);
    let input: Tensor<f64> = Tensor::full(vec![1, 1, 1, 1], 1.0);
    let templates: Tensor<f64> = Tensor::zeros(vec![1, 1, 3, 3]);
    let weights: Tensor<f64> = Tensor::ones(vec![1, 1, 3, 3]);
    let out = similarity_forward(&input, &templates, &weights, &attrs).unwrap();
    assert_eq!(out.data(), &[-(1.0 + 8.0 * 6.25)]);
}

#[test]
fn test_floor_rounding_is_pinned() {
    // (8 - 3) / 2 = 2.5: the trailing half block is not counted.
    let input: Tensor<f64> = Tensor::zeros(vec![1, 1, 8, 8]);
    let templates: Tensor<f64> = Tensor::zeros(vec![1, 1, 3, 3]);
    let weights: Tensor<f64> = Tensor::ones(vec![1, 1, 3, 3]);
    let out = similarity_forward(&input, &templates, &weights, &SimilarityAttrs::default()).unwrap();
    assert_eq!(out.shape_vec(), vec![1, 1, 3, 3]);
}
