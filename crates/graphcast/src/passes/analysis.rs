use std::collections::HashMap;

use tracing::debug;

use crate::capability::{preferred_fallback, CapabilityOracle};
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, Node, NodeId, ValueId};
use crate::optimizer::ensure_resolved;
use crate::schema::{InferenceRequest, SchemaRegistry};
use crate::spec::{Backend, DType, TypeInfo};

/// Reader side of a mismatched edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeSink {
    /// Input `position` of `node`.
    Node { node: NodeId, position: usize },
    /// Entry `position` of the graph output list.
    GraphOutput { position: usize },
}

/// An edge whose producer delivers `source` while the reader requires `required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub value: ValueId,
    pub sink: EdgeSink,
    pub source: DType,
    pub required: DType,
    /// Backend of the reading node, or of the producer for graph-output sinks.
    pub consumer_backend: Backend,
    /// `None` for graph inputs.
    pub producer_backend: Option<Backend>,
}

/// A node output whose type changes because its producer runs on fallback input types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retype {
    pub node: NodeId,
    pub position: usize,
    pub value: ValueId,
    pub declared: DType,
    pub effective: DType,
}

/// Everything the insertion pass needs, computed without touching the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchPlan {
    pub mismatches: Vec<Mismatch>,
    pub retyped: Vec<Retype>,
}

impl MismatchPlan {
    pub fn is_empty(&self) -> bool {
        self.mismatches.is_empty() && self.retyped.is_empty()
    }
}

/// Computes required input types per placement and the edges that disagree with them.
pub struct MismatchAnalyzer<'a> {
    oracle: &'a dyn CapabilityOracle,
    schemas: &'a dyn SchemaRegistry,
}

impl<'a> MismatchAnalyzer<'a> {
    pub fn new(oracle: &'a dyn CapabilityOracle, schemas: &'a dyn SchemaRegistry) -> Self {
        Self { oracle, schemas }
    }

    fn backend_of(&self, node: &Node) -> Backend {
        node.backend
            .clone()
            .unwrap_or_else(|| self.oracle.default_backend())
    }

    pub fn analyze(&self, graph: &Graph) -> GraphResult<MismatchPlan> {
        ensure_resolved(graph, "mismatch-analysis")?;
        let order = graph.topological_order().unwrap_or_default();

        let mut effective: HashMap<ValueId, DType> = HashMap::new();
        let mut plan = MismatchPlan::default();

        for id in order {
            let node = graph.node(*id)?;
            let backend = self.backend_of(node);
            let mut required = Vec::with_capacity(node.inputs.len());
            let mut fallback = false;

            for (position, input) in node.inputs.iter().enumerate() {
                let declared = declared_dtype(graph, node, *input)?;
                let current = effective.get(input).copied().unwrap_or(declared);
                let supported = self.oracle.supported_types(&node.op, &backend, position);
                if supported.is_empty() {
                    return Err(GraphError::UnsupportedOperator {
                        node: node.name.clone(),
                        op: node.op.to_string(),
                        backend: Some(backend.to_string()),
                    });
                }

                let want = if supported.contains(declared) {
                    declared
                } else if supported.contains(current) {
                    current
                } else {
                    preferred_fallback(supported, current, &backend, self.oracle)
                        .unwrap_or(declared)
                };
                fallback |= want != declared;

                if want != current {
                    plan.mismatches.push(Mismatch {
                        value: *input,
                        sink: EdgeSink::Node {
                            node: node.id,
                            position,
                        },
                        source: current,
                        required: want,
                        consumer_backend: backend.clone(),
                        producer_backend: self.producer_backend(graph, *input)?,
                    });
                }
                required.push(TypeInfo::new(want, graph.value(*input)?.shape.clone()));
            }

            if fallback {
                self.retype_outputs(graph, node, &required, &mut effective, &mut plan)?;
            }
        }

        for (position, output) in graph.graph_outputs().iter().enumerate() {
            let value = graph.value(*output)?;
            let Some(declared) = value.dtype else {
                continue;
            };
            let current = effective.get(output).copied().unwrap_or(declared);
            if current == declared {
                continue;
            }
            let producer_backend = self.producer_backend(graph, *output)?;
            plan.mismatches.push(Mismatch {
                value: *output,
                sink: EdgeSink::GraphOutput { position },
                source: current,
                required: declared,
                consumer_backend: producer_backend
                    .clone()
                    .unwrap_or_else(|| self.oracle.default_backend()),
                producer_backend,
            });
        }

        debug!(
            graph = %graph.name(),
            mismatches = plan.mismatches.len(),
            retyped = plan.retyped.len(),
            "analyzed placement"
        );
        Ok(plan)
    }

    fn producer_backend(&self, graph: &Graph, value: ValueId) -> GraphResult<Option<Backend>> {
        match graph.producer_of(value) {
            Some(producer) => Ok(Some(self.backend_of(graph.node(producer)?))),
            None => Ok(None),
        }
    }

    fn retype_outputs(
        &self,
        graph: &Graph,
        node: &Node,
        required: &[TypeInfo],
        effective: &mut HashMap<ValueId, DType>,
        plan: &mut MismatchPlan,
    ) -> GraphResult<()> {
        let Some(schema) = self.schemas.schema(&node.op) else {
            debug!(
                node = %node.name,
                op = %node.op,
                "no schema, outputs keep their declared dtypes under fallback inputs"
            );
            return Ok(());
        };
        let inferred = (schema.infer)(&InferenceRequest {
            node: &node.name,
            inputs: required,
            attributes: &node.attributes,
        })
        .map_err(|reason| GraphError::TypeInference {
            node: node.name.clone(),
            value: None,
            reason,
        })?;

        for (position, (output, info)) in node.outputs.iter().zip(inferred).enumerate() {
            let declared = declared_dtype(graph, node, *output)?;
            if info.dtype == declared {
                continue;
            }
            effective.insert(*output, info.dtype);
            plan.retyped.push(Retype {
                node: node.id,
                position,
                value: *output,
                declared,
                effective: info.dtype,
            });
        }
        Ok(())
    }
}

fn declared_dtype(graph: &Graph, node: &Node, value: ValueId) -> GraphResult<DType> {
    graph.value(value)?.dtype.ok_or_else(|| GraphError::TypeInference {
        node: node.name.clone(),
        value: Some(graph.value_name(value).to_string()),
        reason: "value has no dtype".to_string(),
    })
}
