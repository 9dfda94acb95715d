//! Kernel capability queries.
//!
//! The oracle answers which element types a backend's kernel accepts at each input of an
//! operator and which conversions a backend can execute. Passes only read it.

mod catalog;

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::spec::{Backend, DType, OpId, TypeSet};

pub use catalog::{CatalogError, ConversionDef, KernelCatalog, KernelDef};

/// Side-effect free source of kernel capabilities.
pub trait CapabilityOracle: Send + Sync {
    /// Backend assumed for nodes without an explicit assignment.
    fn default_backend(&self) -> Backend;

    /// Backends registering a kernel for `op`, in registration order.
    fn backends_for(&self, op: &OpId) -> Vec<Backend>;

    /// Element types accepted at input `input` of `op` on `backend`.
    fn supported_types(&self, op: &OpId, backend: &Backend, input: usize) -> TypeSet;

    /// Whether `backend` can execute a conversion from `from` to `to`.
    fn can_convert(&self, from: DType, to: DType, backend: &Backend) -> bool;

    fn is_known(&self, op: &OpId) -> bool {
        !self.backends_for(op).is_empty()
    }
}

/// Picks the member of `supported` a value of type `effective` should be converted to.
///
/// Ranking: same numeric family first, then types not narrower than `effective`, then the
/// closest bit width, then types `backend` can convert `effective` to. Remaining ties go to
/// canonical dtype order.
pub fn preferred_fallback(
    supported: TypeSet,
    effective: DType,
    backend: &Backend,
    oracle: &dyn CapabilityOracle,
) -> Option<DType> {
    supported.iter().min_by_key(|candidate| {
        let width = effective.bitwidth();
        let candidate_width = candidate.bitwidth();
        (
            !candidate.same_family(effective),
            candidate_width < width,
            candidate_width.abs_diff(width),
            !oracle.can_convert(effective, *candidate, backend),
        )
    })
}

type TypeKey = (OpId, Backend, usize);
type ConversionKey = (DType, DType, Backend);

/// Memoizing wrapper scoped to a single pass invocation.
pub struct CachedOracle<'a> {
    inner: &'a dyn CapabilityOracle,
    default_backend: OnceLock<Backend>,
    backends: RwLock<HashMap<OpId, Vec<Backend>>>,
    types: RwLock<HashMap<TypeKey, TypeSet>>,
    conversions: RwLock<HashMap<ConversionKey, bool>>,
}

impl<'a> CachedOracle<'a> {
    pub fn new(inner: &'a dyn CapabilityOracle) -> Self {
        Self {
            inner,
            default_backend: OnceLock::new(),
            backends: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
            conversions: RwLock::new(HashMap::new()),
        }
    }
}

impl CapabilityOracle for CachedOracle<'_> {
    fn default_backend(&self) -> Backend {
        self.default_backend
            .get_or_init(|| self.inner.default_backend())
            .clone()
    }

    fn backends_for(&self, op: &OpId) -> Vec<Backend> {
        if let Some(hit) = self
            .backends
            .read()
            .expect("capability cache poisoned")
            .get(op)
        {
            return hit.clone();
        }
        let backends = self.inner.backends_for(op);
        self.backends
            .write()
            .expect("capability cache poisoned")
            .insert(op.clone(), backends.clone());
        backends
    }

    fn supported_types(&self, op: &OpId, backend: &Backend, input: usize) -> TypeSet {
        let key = (op.clone(), backend.clone(), input);
        if let Some(hit) = self
            .types
            .read()
            .expect("capability cache poisoned")
            .get(&key)
        {
            return *hit;
        }
        let types = self.inner.supported_types(op, backend, input);
        self.types
            .write()
            .expect("capability cache poisoned")
            .insert(key, types);
        types
    }

    fn can_convert(&self, from: DType, to: DType, backend: &Backend) -> bool {
        let key = (from, to, backend.clone());
        if let Some(hit) = self
            .conversions
            .read()
            .expect("capability cache poisoned")
            .get(&key)
        {
            return *hit;
        }
        let allowed = self.inner.can_convert(from, to, backend);
        self.conversions
            .write()
            .expect("capability cache poisoned")
            .insert(key, allowed);
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> KernelCatalog {
        KernelCatalog::new(Backend::cpu())
            .with_kernel(
                OpId::onnx("MatMul"),
                Backend::cpu(),
                &[TypeSet::of(&[DType::F32, DType::F64])],
            )
            .with_conversion(
                Backend::cpu(),
                TypeSet::of(&[DType::F16, DType::F32]),
                TypeSet::of(&[DType::F16, DType::F32]),
            )
    }

    #[test]
    fn fallback_prefers_closest_wider_float() {
        let catalog = catalog();
        let supported = TypeSet::of(&[DType::Si32, DType::F32, DType::F64]);
        let picked = preferred_fallback(supported, DType::F16, &Backend::cpu(), &catalog);
        assert_eq!(picked, Some(DType::F32));

        let only_half = TypeSet::of(&[DType::F16]);
        let picked = preferred_fallback(only_half, DType::F64, &Backend::cpu(), &catalog);
        assert_eq!(picked, Some(DType::F16));
        assert_eq!(
            preferred_fallback(TypeSet::empty(), DType::F16, &Backend::cpu(), &catalog),
            None
        );
    }

    #[test]
    fn cached_oracle_matches_inner_answers() {
        let catalog = catalog();
        let cached = CachedOracle::new(&catalog);
        let matmul = OpId::onnx("MatMul");
        for _ in 0..2 {
            assert_eq!(
                cached.supported_types(&matmul, &Backend::cpu(), 1),
                catalog.supported_types(&matmul, &Backend::cpu(), 1)
            );
            assert!(cached.can_convert(DType::F16, DType::F32, &Backend::cpu()));
            assert!(!cached.can_convert(DType::F16, DType::F32, &Backend::cuda()));
            assert_eq!(cached.backends_for(&matmul), vec![Backend::cpu()]);
        }
        assert_eq!(cached.default_backend(), Backend::cpu());
    }
}
