use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CapabilityOracle;
use crate::spec::{Backend, DType, OpId, TypeSet};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid kernel catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel `{op}` on `{backend}` accepts no dtype at input {input}")]
    EmptyInput {
        op: String,
        backend: String,
        input: usize,
    },
    #[error("conversion row on `{backend}` has an empty {side} set")]
    EmptyConversion { backend: String, side: &'static str },
}

/// One kernel registration. The last entry of `inputs` repeats for variadic inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDef {
    #[serde(flatten)]
    pub op: OpId,
    pub backend: Backend,
    pub inputs: Vec<TypeSet>,
}

impl KernelDef {
    fn input(&self, position: usize) -> TypeSet {
        self.inputs
            .get(position)
            .or_else(|| self.inputs.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Conversions `backend` executes: any member of `from` to any member of `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionDef {
    pub backend: Backend,
    pub from: TypeSet,
    pub to: TypeSet,
}

/// Table-driven capability oracle.
///
/// Conversion rows double as `Cast` kernels: a backend with a conversion row accepts the
/// row's `from` types at the single `Cast` input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelCatalog {
    pub default_backend: Backend,
    #[serde(default)]
    pub kernels: Vec<KernelDef>,
    #[serde(default)]
    pub conversions: Vec<ConversionDef>,
}

impl KernelCatalog {
    pub fn new(default_backend: Backend) -> Self {
        Self {
            default_backend,
            kernels: Vec::new(),
            conversions: Vec::new(),
        }
    }

    pub fn with_kernel(mut self, op: OpId, backend: Backend, inputs: &[TypeSet]) -> Self {
        self.kernels.push(KernelDef {
            op,
            backend,
            inputs: inputs.to_vec(),
        });
        self
    }

    pub fn with_conversion(mut self, backend: Backend, from: TypeSet, to: TypeSet) -> Self {
        self.conversions.push(ConversionDef { backend, from, to });
        self
    }

    /// Parses and validates a catalog from its JSON form.
    ///
    /// ```json
    /// {
    ///   "default_backend": "cpu",
    ///   "kernels": [{ "op_type": "MatMul", "backend": "cpu", "inputs": [["f32", "f64"]] }],
    ///   "conversions": [{ "backend": "cpu", "from": ["f16", "f32"], "to": ["f16", "f32"] }]
    /// }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let catalog: KernelCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn to_json(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        for kernel in &self.kernels {
            if let Some(input) = kernel.inputs.iter().position(|set| set.is_empty()) {
                return Err(CatalogError::EmptyInput {
                    op: kernel.op.to_string(),
                    backend: kernel.backend.to_string(),
                    input,
                });
            }
        }
        for row in &self.conversions {
            let side = if row.from.is_empty() {
                "from"
            } else if row.to.is_empty() {
                "to"
            } else {
                continue;
            };
            return Err(CatalogError::EmptyConversion {
                backend: row.backend.to_string(),
                side,
            });
        }
        Ok(())
    }

    fn kernels_on<'a>(
        &'a self,
        op: &'a OpId,
        backend: &'a Backend,
    ) -> impl Iterator<Item = &'a KernelDef> + 'a {
        self.kernels
            .iter()
            .filter(move |kernel| &kernel.op == op && &kernel.backend == backend)
    }
}

impl CapabilityOracle for KernelCatalog {
    fn default_backend(&self) -> Backend {
        self.default_backend.clone()
    }

    fn backends_for(&self, op: &OpId) -> Vec<Backend> {
        let mut backends: Vec<Backend> = Vec::new();
        let mut push = |backend: &Backend| {
            if !backends.contains(backend) {
                backends.push(backend.clone());
            }
        };
        for kernel in self.kernels.iter().filter(|kernel| &kernel.op == op) {
            push(&kernel.backend);
        }
        if op.is_cast() {
            for row in &self.conversions {
                push(&row.backend);
            }
        }
        backends
    }

    fn supported_types(&self, op: &OpId, backend: &Backend, input: usize) -> TypeSet {
        let mut types = self
            .kernels_on(op, backend)
            .fold(TypeSet::empty(), |acc, kernel| acc.union(kernel.input(input)));
        if op.is_cast() && input == 0 {
            for row in self.conversions.iter().filter(|row| &row.backend == backend) {
                types = types.union(row.from);
            }
        }
        types
    }

    fn can_convert(&self, from: DType, to: DType, backend: &Backend) -> bool {
        self.conversions.iter().any(|row| {
            &row.backend == backend && row.from.contains(from) && row.to.contains(to)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variadic_inputs_reuse_last_entry() {
        let catalog = KernelCatalog::new(Backend::cpu()).with_kernel(
            OpId::onnx("Sum"),
            Backend::cpu(),
            &[TypeSet::of(&[DType::F32])],
        );
        let sum = OpId::onnx("Sum");
        assert!(catalog
            .supported_types(&sum, &Backend::cpu(), 5)
            .contains(DType::F32));
        assert!(catalog
            .supported_types(&sum, &Backend::cuda(), 0)
            .is_empty());
    }

    #[test]
    fn conversion_rows_register_cast_kernels() {
        let catalog = KernelCatalog::new(Backend::cpu()).with_conversion(
            Backend::cuda(),
            TypeSet::of(&[DType::F16]),
            TypeSet::of(&[DType::F32]),
        );
        let cast = OpId::cast();
        assert_eq!(catalog.backends_for(&cast), vec![Backend::cuda()]);
        assert_eq!(
            catalog.supported_types(&cast, &Backend::cuda(), 0),
            TypeSet::of(&[DType::F16])
        );
        assert!(catalog.can_convert(DType::F16, DType::F32, &Backend::cuda()));
        assert!(!catalog.can_convert(DType::F32, DType::F16, &Backend::cuda()));
    }
}
