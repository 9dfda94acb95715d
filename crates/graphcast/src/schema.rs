//! Operator schemas: arity and pure type-inference rules per operator identity.

use std::collections::{BTreeMap, HashMap};

use crate::spec::{
    Attribute, DType, Dimension, OpId, Shape, TypeInfo, CAST_OP_TYPE, CAST_TO_ATTR,
};

/// Domain hosting the vendor contrib operators.
pub const CONTRIB_DOMAIN: &str = "com.microsoft";

/// Arguments handed to a type-inference rule.
pub struct InferenceRequest<'a> {
    pub node: &'a str,
    pub inputs: &'a [TypeInfo],
    pub attributes: &'a BTreeMap<String, Attribute>,
}

impl InferenceRequest<'_> {
    fn input(&self, index: usize) -> Result<&TypeInfo, String> {
        self.inputs
            .get(index)
            .ok_or_else(|| format!("missing input {index}"))
    }
}

/// Pure function mapping input types and attributes to output types.
pub type InferFn = fn(&InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String>;

#[derive(Clone)]
pub struct OpSchema {
    pub op: OpId,
    pub min_inputs: usize,
    pub max_inputs: usize,
    pub outputs: usize,
    pub infer: InferFn,
}

impl OpSchema {
    pub fn new(op: OpId, inputs: (usize, usize), outputs: usize, infer: InferFn) -> Self {
        Self {
            op,
            min_inputs: inputs.0,
            max_inputs: inputs.1,
            outputs,
            infer,
        }
    }

    /// Checks arity before running the inference rule.
    pub fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        if inputs < self.min_inputs || inputs > self.max_inputs {
            return Err(format!(
                "{} expects {}..={} inputs, got {inputs}",
                self.op, self.min_inputs, self.max_inputs
            ));
        }
        if outputs != self.outputs {
            return Err(format!(
                "{} produces {} outputs, node declares {outputs}",
                self.op, self.outputs
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for OpSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpSchema")
            .field("op", &self.op)
            .field("min_inputs", &self.min_inputs)
            .field("max_inputs", &self.max_inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Source of operator schemas consumed by the resolver and the analyzer.
pub trait SchemaRegistry: Send + Sync {
    fn schema(&self, op: &OpId) -> Option<&OpSchema>;
}

/// In-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: HashMap<OpId, OpSchema>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the operators the conversion passes know about.
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        for op in [
            "Identity", "Relu", "Neg", "Abs", "Sigmoid", "Tanh", "Softmax", "Inverse",
        ] {
            set.register(OpSchema::new(OpId::onnx(op), (1, 1), 1, same_as_first));
        }
        set.register(OpSchema::new(OpId::onnx("Clip"), (1, 3), 1, clip));
        for op in ["Add", "Sub", "Mul", "Div"] {
            set.register(OpSchema::new(OpId::onnx(op), (2, 2), 1, elementwise_binary));
        }
        set.register(OpSchema::new(OpId::onnx("MatMul"), (2, 2), 1, matmul));
        set.register(OpSchema::new(OpId::onnx("Transpose"), (1, 1), 1, transpose));
        set.register(OpSchema::new(OpId::onnx(CAST_OP_TYPE), (1, 1), 1, cast));
        set.register(OpSchema::new(
            OpId::new("ComplexMul", CONTRIB_DOMAIN),
            (2, 2),
            1,
            elementwise_binary,
        ));
        set
    }

    pub fn register(&mut self, schema: OpSchema) {
        self.schemas.insert(schema.op.clone(), schema);
    }
}

impl SchemaRegistry for SchemaSet {
    fn schema(&self, op: &OpId) -> Option<&OpSchema> {
        self.schemas.get(op)
    }
}

fn same_as_first(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    Ok(vec![req.input(0)?.clone()])
}

fn clip(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    let data = req.input(0)?;
    for bound in &req.inputs[1..] {
        if bound.dtype != data.dtype {
            return Err(format!(
                "clip bound dtype {} does not match input dtype {}",
                bound.dtype, data.dtype
            ));
        }
    }
    Ok(vec![data.clone()])
}

fn elementwise_binary(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    let lhs = req.input(0)?;
    let rhs = req.input(1)?;
    if lhs.dtype != rhs.dtype {
        return Err(format!("operand dtypes differ: {} vs {}", lhs.dtype, rhs.dtype));
    }
    let shape = match (&lhs.shape, &rhs.shape) {
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        _ => None,
    };
    Ok(vec![TypeInfo::new(lhs.dtype, shape)])
}

fn matmul(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    let lhs = req.input(0)?;
    let rhs = req.input(1)?;
    if lhs.dtype != rhs.dtype {
        return Err(format!("operand dtypes differ: {} vs {}", lhs.dtype, rhs.dtype));
    }
    let shape = match (&lhs.shape, &rhs.shape) {
        (Some(a), Some(b)) if a.rank() >= 2 && b.rank() >= 2 => {
            let a_dims = a.dims();
            let b_dims = b.dims();
            let k_lhs = &a_dims[a_dims.len() - 1];
            let k_rhs = &b_dims[b_dims.len() - 2];
            if let (Dimension::Static(l), Dimension::Static(r)) = (k_lhs, k_rhs) {
                if l != r {
                    return Err(format!("contraction dims differ: {l} vs {r}"));
                }
            }
            let mut dims = a_dims[..a_dims.len() - 1].to_vec();
            dims.push(b_dims[b_dims.len() - 1].clone());
            Some(Shape::new(dims))
        }
        _ => None,
    };
    Ok(vec![TypeInfo::new(lhs.dtype, shape)])
}

fn transpose(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    let data = req.input(0)?;
    let shape = match &data.shape {
        Some(shape) => {
            let dims = shape.dims();
            let perm: Vec<usize> = match req.attributes.get("perm") {
                Some(Attribute::Ints(perm)) => perm
                    .iter()
                    .map(|p| usize::try_from(*p).map_err(|_| format!("negative perm entry {p}")))
                    .collect::<Result<_, _>>()?,
                Some(other) => return Err(format!("perm must be a list of ints, got {other}")),
                None => (0..dims.len()).rev().collect(),
            };
            if perm.len() != dims.len() || perm.iter().any(|p| *p >= dims.len()) {
                return Err(format!("perm {perm:?} is invalid for rank {}", dims.len()));
            }
            Some(Shape::new(
                perm.iter().map(|p| dims[*p].clone()).collect::<Vec<_>>(),
            ))
        }
        None => None,
    };
    Ok(vec![TypeInfo::new(data.dtype, shape)])
}

fn cast(req: &InferenceRequest<'_>) -> Result<Vec<TypeInfo>, String> {
    let data = req.input(0)?;
    let to = match req.attributes.get(CAST_TO_ATTR) {
        Some(Attribute::DType(dtype)) => *dtype,
        Some(Attribute::String(name)) => name.parse::<DType>()?,
        Some(other) => return Err(format!("`to` must name a dtype, got {other}")),
        None => return Err("missing `to` attribute".to_string()),
    };
    Ok(vec![TypeInfo::new(to, data.shape.clone())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        op: &OpId,
        inputs: &[TypeInfo],
        attributes: &BTreeMap<String, Attribute>,
    ) -> Result<Vec<TypeInfo>, String> {
        let set = SchemaSet::with_defaults();
        let schema = set.schema(op).expect("schema registered");
        (schema.infer)(&InferenceRequest {
            node: "n",
            inputs,
            attributes,
        })
    }

    #[test]
    fn matmul_infers_output_shape() {
        let lhs = TypeInfo::new(DType::F16, Some(Shape::from_static(&[4, 8])));
        let rhs = TypeInfo::new(DType::F16, Some(Shape::from_static(&[8, 2])));
        let out = run(&OpId::onnx("MatMul"), &[lhs, rhs], &BTreeMap::new()).unwrap();
        assert_eq!(out[0].dtype, DType::F16);
        assert_eq!(out[0].shape, Some(Shape::from_static(&[4, 2])));
    }

    #[test]
    fn matmul_rejects_mixed_dtypes() {
        let lhs = TypeInfo::new(DType::F16, None);
        let rhs = TypeInfo::new(DType::F32, None);
        let err = run(&OpId::onnx("MatMul"), &[lhs, rhs], &BTreeMap::new()).unwrap_err();
        assert!(err.contains("f16 vs f32"), "{err}");
    }

    #[test]
    fn cast_reads_target_from_attribute() {
        let mut attrs = BTreeMap::new();
        attrs.insert(CAST_TO_ATTR.to_string(), Attribute::DType(DType::F32));
        let input = TypeInfo::new(DType::F16, Some(Shape::from_static(&[3])));
        let out = run(&OpId::cast(), &[input], &attrs).unwrap();
        assert_eq!(out[0], TypeInfo::new(DType::F32, Some(Shape::from_static(&[3]))));
    }

    #[test]
    fn transpose_defaults_to_reversed_axes() {
        let input = TypeInfo::new(DType::F32, Some(Shape::from_static(&[2, 3, 5])));
        let out = run(&OpId::onnx("Transpose"), &[input], &BTreeMap::new()).unwrap();
        assert_eq!(out[0].shape, Some(Shape::from_static(&[5, 3, 2])));
    }
}
