//! Explicit operator registry.
//!
//! A hosting graph runtime looks operators up by name, runs their shape
//! functions during graph construction and their kernels during evaluation.
//! The registry is an ordinary value built at startup; nothing registers
//! itself behind the caller's back.

use std::collections::BTreeMap;

use log::{debug, trace};
use serde_json::Value;
use simnets_core::{Float, PartialShape, Shape, Tensor};

use crate::attrs::SimilarityAttrs;
use crate::error::{OpError, OpResult};
use crate::forward::similarity_forward;
use crate::input_grad::similarity_input_grad;
use crate::params_grad::similarity_parameters_grad;
use crate::reference::similarity_forward_ref;
use crate::shape_fn::{forward_shape_fn, input_grad_shape_fn, parameters_grad_shape_fn};

pub const SIMILARITY: &str = "Similarity";
pub const SIMILARITY_REF: &str = "SimilarityRef";
pub const SIMILARITY_INPUT_GRAD: &str = "SimilarityInputGrad";
pub const SIMILARITY_PARAMETERS_GRAD: &str = "SimilarityParametersGrad";

/// Element types a tensor slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => <f32 as Float>::NAME,
            DType::F64 => <f64 as Float>::NAME,
        }
    }
}

/// A dense tensor of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    F32(Tensor<f32>),
    F64(Tensor<f64>),
}

impl TensorValue {
    pub fn dtype(&self) -> DType {
        match self {
            TensorValue::F32(_) => DType::F32,
            TensorValue::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &Shape {
        match self {
            TensorValue::F32(t) => t.shape(),
            TensorValue::F64(t) => t.shape(),
        }
    }

    pub fn as_f32(&self) -> Option<&Tensor<f32>> {
        match self {
            TensorValue::F32(t) => Some(t),
            TensorValue::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&Tensor<f64>> {
        match self {
            TensorValue::F64(t) => Some(t),
            TensorValue::F32(_) => None,
        }
    }
}

impl From<Tensor<f32>> for TensorValue {
    fn from(t: Tensor<f32>) -> Self {
        TensorValue::F32(t)
    }
}

impl From<Tensor<f64>> for TensorValue {
    fn from(t: Tensor<f64>) -> Self {
        TensorValue::F64(t)
    }
}

/// One entry of an operator's attribute schema.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDef {
    pub name: String,
    /// Type as the runtime's attribute parser spells it, e.g. `list(int)`.
    pub kind: &'static str,
    pub default: Value,
}

pub type ShapeFn = fn(&[PartialShape], &SimilarityAttrs) -> OpResult<Vec<PartialShape>>;
pub type KernelFn<T> = fn(&[&Tensor<T>], &SimilarityAttrs) -> OpResult<Vec<Tensor<T>>>;

/// Everything the runtime needs to know about one operator.
#[derive(Debug, Clone)]
pub struct OpDef {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub dtypes: &'static [DType],
    pub attrs: Vec<AttrDef>,
    pub shape_fn: ShapeFn,
    pub kernel_f32: KernelFn<f32>,
    pub kernel_f64: KernelFn<f64>,
    /// Operators producing the gradients of this operator's inputs, if any.
    pub gradients: &'static [&'static str],
}

impl OpDef {
    pub fn infer_shapes(
        &self,
        inputs: &[PartialShape],
        attrs: &SimilarityAttrs,
    ) -> OpResult<Vec<PartialShape>> {
        self.check_arity(inputs.len())?;
        (self.shape_fn)(inputs, attrs)
    }

    pub fn evaluate(&self, inputs: &[TensorValue], attrs: &SimilarityAttrs) -> OpResult<Vec<TensorValue>> {
        self.check_arity(inputs.len())?;
        let dtypes: Vec<DType> = inputs.iter().map(TensorValue::dtype).collect();
        let dtype = match dtypes.first() {
            Some(&d) if dtypes.iter().all(|&x| x == d) && self.dtypes.contains(&d) => d,
            _ => {
                return Err(OpError::DTypeMismatch {
                    op: self.name.to_string(),
                    got: dtypes.iter().map(|d| d.name()).collect(),
                })
            }
        };
        debug!("evaluating {} on {}", self.name, dtype.name());

        match dtype {
            DType::F32 => {
                let tensors: Vec<&Tensor<f32>> = inputs.iter().filter_map(TensorValue::as_f32).collect();
                let out = (self.kernel_f32)(&tensors, attrs)?;
                Ok(out.into_iter().map(TensorValue::from).collect())
            }
            DType::F64 => {
                let tensors: Vec<&Tensor<f64>> = inputs.iter().filter_map(TensorValue::as_f64).collect();
                let out = (self.kernel_f64)(&tensors, attrs)?;
                Ok(out.into_iter().map(TensorValue::from).collect())
            }
        }
    }

    fn check_arity(&self, got: usize) -> OpResult<()> {
        if got != self.inputs.len() {
            return Err(OpError::ArityMismatch {
                op: self.name.to_string(),
                expected: self.inputs.len(),
                got,
            });
        }
        Ok(())
    }
}

// ─── Kernels ────────────────────────────────────────────────────────────────

fn unpack<'a, T: Float, const N: usize>(inputs: &[&'a Tensor<T>]) -> OpResult<[&'a Tensor<T>; N]> {
    <[&Tensor<T>; N]>::try_from(inputs).map_err(|_| OpError::ArityMismatch {
        op: "kernel".to_string(),
        expected: N,
        got: inputs.len(),
    })
}

fn forward_kernel<T: Float>(inputs: &[&Tensor<T>], attrs: &SimilarityAttrs) -> OpResult<Vec<Tensor<T>>> {
    let [input, templates, weights] = unpack::<T, 3>(inputs)?;
    Ok(vec![similarity_forward(input, templates, weights, attrs)?])
}

fn forward_ref_kernel<T: Float>(inputs: &[&Tensor<T>], attrs: &SimilarityAttrs) -> OpResult<Vec<Tensor<T>>> {
    let [input, templates, weights] = unpack::<T, 3>(inputs)?;
    Ok(vec![similarity_forward_ref(input, templates, weights, attrs)?])
}

fn input_grad_kernel<T: Float>(inputs: &[&Tensor<T>], attrs: &SimilarityAttrs) -> OpResult<Vec<Tensor<T>>> {
    let [input, templates, weights, output_grad] = unpack::<T, 4>(inputs)?;
    Ok(vec![similarity_input_grad(input, templates, weights, output_grad, attrs)?])
}

fn parameters_grad_kernel<T: Float>(
    inputs: &[&Tensor<T>],
    attrs: &SimilarityAttrs,
) -> OpResult<Vec<Tensor<T>>> {
    let [input, templates, weights, output_grad] = unpack::<T, 4>(inputs)?;
    let (templates_grad, weights_grad) =
        similarity_parameters_grad(input, templates, weights, output_grad, attrs)?;
    Ok(vec![templates_grad, weights_grad])
}

// ─── Definitions ────────────────────────────────────────────────────────────

const FLOAT_TYPES: &[DType] = &[DType::F32, DType::F64];
const FORWARD_INPUTS: &[&str] = &["input", "templates", "weights"];
const GRAD_INPUTS: &[&str] = &["input", "templates", "weights", "output_grad"];

fn attr_kind(name: &str) -> &'static str {
    match name {
        "similarity_function" => "{'L1', 'L2'}",
        "blocks" | "strides" | "padding" => "list(int)",
        "normalization_term" | "ignore_nan_input" => "bool",
        _ => "float",
    }
}

/// The shared attribute schema, with defaults taken from [`SimilarityAttrs::default`].
pub fn similarity_attr_schema() -> OpResult<Vec<AttrDef>> {
    let defaults = SimilarityAttrs::default().to_json()?;
    let map = match defaults {
        Value::Object(map) => map,
        other => {
            return Err(OpError::InvalidAttribute {
                attr: "similarity",
                reason: format!("defaults did not serialize to a map: {}", other),
            })
        }
    };
    Ok(map
        .into_iter()
        .map(|(name, default)| AttrDef {
            kind: attr_kind(&name),
            name,
            default,
        })
        .collect())
}

fn similarity_defs() -> OpResult<Vec<OpDef>> {
    let schema = similarity_attr_schema()?;
    Ok(vec![
        OpDef {
            name: SIMILARITY,
            inputs: FORWARD_INPUTS,
            outputs: &["output"],
            dtypes: FLOAT_TYPES,
            attrs: schema.clone(),
            shape_fn: forward_shape_fn,
            kernel_f32: forward_kernel::<f32>,
            kernel_f64: forward_kernel::<f64>,
            gradients: &[SIMILARITY_INPUT_GRAD, SIMILARITY_PARAMETERS_GRAD],
        },
        OpDef {
            name: SIMILARITY_REF,
            inputs: FORWARD_INPUTS,
            outputs: &["output"],
            dtypes: FLOAT_TYPES,
            attrs: schema.clone(),
            shape_fn: forward_shape_fn,
            kernel_f32: forward_ref_kernel::<f32>,
            kernel_f64: forward_ref_kernel::<f64>,
            gradients: &[SIMILARITY_INPUT_GRAD, SIMILARITY_PARAMETERS_GRAD],
        },
        OpDef {
            name: SIMILARITY_INPUT_GRAD,
            inputs: GRAD_INPUTS,
            outputs: &["output"],
            dtypes: FLOAT_TYPES,
            attrs: schema.clone(),
            shape_fn: input_grad_shape_fn,
            kernel_f32: input_grad_kernel::<f32>,
            kernel_f64: input_grad_kernel::<f64>,
            gradients: &[],
        },
        OpDef {
            name: SIMILARITY_PARAMETERS_GRAD,
            inputs: GRAD_INPUTS,
            outputs: &["templates_grad", "weights_grad"],
            dtypes: FLOAT_TYPES,
            attrs: schema,
            shape_fn: parameters_grad_shape_fn,
            kernel_f32: parameters_grad_kernel::<f32>,
            kernel_f64: parameters_grad_kernel::<f64>,
            gradients: &[],
        },
    ])
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Name → operator definition.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    ops: BTreeMap<&'static str, OpDef>,
}

impl OpRegistry {
    pub fn new() -> Self {
        OpRegistry::default()
    }

    /// Registry holding the forward, reference and both gradient operators.
    pub fn with_similarity_ops() -> OpResult<Self> {
        let mut registry = OpRegistry::new();
        for def in similarity_defs()? {
            registry.register(def)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, def: OpDef) -> OpResult<()> {
        if self.ops.contains_key(def.name) {
            return Err(OpError::DuplicateOperator(def.name.to_string()));
        }
        debug!("registering operator {}", def.name);
        self.ops.insert(def.name, def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> OpResult<&OpDef> {
        trace!("looking up operator {}", name);
        self.ops
            .get(name)
            .ok_or_else(|| OpError::UnknownOperator(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run an operator's shape function on an attribute map as parsed by the runtime.
    pub fn infer_shapes(&self, name: &str, inputs: &[PartialShape], attrs: &Value) -> OpResult<Vec<PartialShape>> {
        let def = self.get(name)?;
        def.infer_shapes(inputs, &SimilarityAttrs::from_json(attrs)?)
    }

    /// Run an operator's kernel on an attribute map as parsed by the runtime.
    pub fn evaluate(&self, name: &str, inputs: &[TensorValue], attrs: &Value) -> OpResult<Vec<TensorValue>> {
        let def = self.get(name)?;
        def.evaluate(inputs, &SimilarityAttrs::from_json(attrs)?)
    }

    /// Gradient operators paired with a forward operator.
    pub fn gradients_of(&self, name: &str) -> OpResult<Vec<&OpDef>> {
        self.get(name)?
            .gradients
            .iter()
            .map(|g| self.get(g))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> OpRegistry {
        OpRegistry::with_similarity_ops().unwrap()
    }

    #[test]
    fn test_registers_four_operators() {
        let r = registry();
        assert_eq!(r.len(), 4);
        let names: Vec<_> = r.names().collect();
        assert_eq!(
            names,
            vec![SIMILARITY, SIMILARITY_INPUT_GRAD, SIMILARITY_PARAMETERS_GRAD, SIMILARITY_REF]
        );
        assert!(matches!(r.get("Conv2D"), Err(OpError::UnknownOperator(_))));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut r = registry();
        let def = r.get(SIMILARITY).unwrap().clone();
        assert!(matches!(r.register(def), Err(OpError::DuplicateOperator(_))));
    }

    #[test]
    fn test_signatures() {
        let r = registry();
        let fwd = r.get(SIMILARITY).unwrap();
        assert_eq!(fwd.inputs, &["input", "templates", "weights"]);
        assert_eq!(fwd.outputs, &["output"]);
        assert_eq!(fwd.dtypes, &[DType::F32, DType::F64]);
        let pg = r.get(SIMILARITY_PARAMETERS_GRAD).unwrap();
        assert_eq!(pg.outputs, &["templates_grad", "weights_grad"]);

        let grads: Vec<_> = r.gradients_of(SIMILARITY).unwrap().iter().map(|d| d.name).collect();
        assert_eq!(grads, vec![SIMILARITY_INPUT_GRAD, SIMILARITY_PARAMETERS_GRAD]);
    }

    #[test]
    fn test_attr_schema_defaults() {
        let schema = similarity_attr_schema().unwrap();
        assert_eq!(schema.len(), 8);
        let find = |n: &str| schema.iter().find(|a| a.name == n).unwrap().clone();
        assert_eq!(find("similarity_function").default, json!("L2"));
        assert_eq!(find("similarity_function").kind, "{'L1', 'L2'}");
        assert_eq!(find("blocks").default, json!([3, 3]));
        assert_eq!(find("strides").default, json!([2, 2]));
        assert_eq!(find("padding").kind, "list(int)");
        assert_eq!(find("normalization_term").default, json!(false));
        assert_eq!(find("normalization_term_fudge").default, json!(0.001));
        assert_eq!(find("out_of_bounds_value").kind, "float");
    }

    #[test]
    fn test_infer_shapes_through_registry() {
        let r = registry();
        let shapes = [
            PartialShape::from(vec![2, 3, 7, 7]),
            PartialShape::from(vec![5, 3, 3, 3]),
            PartialShape::from(vec![5, 3, 3, 3]),
        ];
        let out = r.infer_shapes(SIMILARITY, &shapes, &json!({})).unwrap();
        assert_eq!(out, vec![PartialShape::from(vec![2, 5, 3, 3])]);

        let err = r.infer_shapes(SIMILARITY, &shapes, &json!({ "strides": [2] })).unwrap_err();
        assert!(matches!(err, OpError::AttributeCardinality { .. }));

        let err = r.infer_shapes(SIMILARITY, &shapes[..2], &json!({})).unwrap_err();
        assert!(matches!(err, OpError::ArityMismatch { expected: 3, got: 2, .. }));
    }

    #[test]
    fn test_evaluate_dispatches_by_dtype() {
        let r = registry();
        let attrs = json!({ "blocks": [2, 2], "strides": [1, 1] });
        let input: Tensor<f32> = Tensor::randn(vec![1, 2, 4, 4], Some(1));
        let templates: Tensor<f32> = Tensor::randn(vec![3, 2, 2, 2], Some(2));
        let weights: Tensor<f32> = Tensor::rand(vec![3, 2, 2, 2], Some(3));
        let inputs: [TensorValue; 3] = [input.into(), templates.into(), weights.into()];

        let fast = r.evaluate(SIMILARITY, &inputs, &attrs).unwrap();
        let slow = r.evaluate(SIMILARITY_REF, &inputs, &attrs).unwrap();
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0].dtype(), DType::F32);
        assert_eq!(fast[0].shape().dims(), &[1, 3, 3, 3]);
        assert!(fast[0].as_f32().unwrap().max_abs_diff(slow[0].as_f32().unwrap()).unwrap() < 1e-5);

        let upstream: Tensor<f32> = Tensor::ones(vec![1, 3, 3, 3]);
        let mut grad_inputs = inputs.to_vec();
        grad_inputs.push(upstream.into());
        let input_grad = r.evaluate(SIMILARITY_INPUT_GRAD, &grad_inputs, &attrs).unwrap();
        assert_eq!(input_grad[0].shape().dims(), &[1, 2, 4, 4]);
        let params_grad = r.evaluate(SIMILARITY_PARAMETERS_GRAD, &grad_inputs, &attrs).unwrap();
        assert_eq!(params_grad.len(), 2);
        assert_eq!(params_grad[1].shape().dims(), &[3, 2, 2, 2]);
    }

    #[test]
    fn test_evaluate_rejects_mixed_dtypes() {
        let r = registry();
        let inputs = [
            TensorValue::from(Tensor::<f32>::zeros(vec![1, 1, 3, 3])),
            TensorValue::from(Tensor::<f64>::zeros(vec![1, 1, 3, 3])),
            TensorValue::from(Tensor::<f64>::zeros(vec![1, 1, 3, 3])),
        ];
        let err = r.evaluate(SIMILARITY, &inputs, &json!({})).unwrap_err();
        assert!(matches!(err, OpError::DTypeMismatch { .. }));
    }

    #[test]
    fn test_evaluate_rejects_unknown_attribute() {
        let r = registry();
        let inputs = [
            TensorValue::from(Tensor::<f64>::zeros(vec![1, 1, 3, 3])),
            TensorValue::from(Tensor::<f64>::zeros(vec![1, 1, 3, 3])),
            TensorValue::from(Tensor::<f64>::zeros(vec![1, 1, 3, 3])),
        ];
        let err = r.evaluate(SIMILARITY, &inputs, &json!({ "epsilon": 1.0 })).unwrap_err();
        assert!(matches!(err, OpError::AttributeParse(_)));
    }
}
