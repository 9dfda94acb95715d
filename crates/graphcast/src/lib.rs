//! Graph IR with placement-aware conversion insertion and redundant conversion elimination.
//!
//! A [`Graph`] is built through its construction API, resolved with a [`Resolver`], and then
//! rewritten by [`GraphPass`] implementations that consult a [`CapabilityOracle`] for the
//! element types each backend's kernels accept.

pub mod capability;
mod env;
pub mod error;
pub mod graph;
pub mod optimizer;
pub mod passes;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod spec;

pub use capability::{CachedOracle, CapabilityOracle, CatalogError, KernelCatalog};
pub use error::{GraphError, GraphResult};
pub use graph::{Graph, Node, NodeId, Use, Value, ValueId};
pub use optimizer::{GraphPass, OptimizeConfig, OptimizeContext, PassResult};
pub use passes::{EliminateRedundantConversionPass, InsertConversionPass, MismatchAnalyzer};
pub use pipeline::{PipelineBuilder, PipelineError, PipelineOptimizer, Step};
pub use resolver::Resolver;
pub use schema::{OpSchema, SchemaRegistry, SchemaSet};
pub use spec::{Attribute, Backend, DType, Dimension, OpId, Shape, TypeInfo, TypeSet};
