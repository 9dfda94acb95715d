//! Structural validation, topological ordering and type propagation.
//!
//! Resolving a graph is idempotent: a second run over an unchanged graph produces the same
//! order and the same value types. All inferred types are staged and committed only once
//! every node has been checked, so a failed resolve never leaves half-propagated types.

mod topology;

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::capability::CapabilityOracle;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, NodeId, ValueId};
use crate::schema::{InferenceRequest, SchemaRegistry};
use crate::spec::TypeInfo;

pub struct Resolver<'a> {
    schemas: &'a dyn SchemaRegistry,
    oracle: Option<&'a dyn CapabilityOracle>,
}

impl<'a> Resolver<'a> {
    pub fn new(schemas: &'a dyn SchemaRegistry) -> Self {
        Self {
            schemas,
            oracle: None,
        }
    }

    /// Additionally rejects operators no backend registers a kernel for.
    pub fn with_oracle(mut self, oracle: &'a dyn CapabilityOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn resolve(&self, graph: &mut Graph) -> GraphResult<()> {
        graph.clear_resolution();
        infer_boundary(graph);
        check_structure(graph)?;
        if let Some(oracle) = self.oracle {
            check_operators(graph, oracle)?;
        }

        let order = match topology::sort(graph) {
            Ok(order) => order,
            Err(remaining) => {
                let cycle = topology::minimal_cycle(graph, &remaining)
                    .into_iter()
                    .filter_map(|id| graph.node(id).ok().map(|n| n.name.clone()))
                    .collect();
                return Err(GraphError::Cycle {
                    graph: graph.name().to_string(),
                    cycle,
                });
            }
        };

        let staged = self.propagate(graph, &order)?;
        for (value, info) in staged {
            graph.record_inferred(value, info.dtype, info.shape);
        }
        debug!(graph = %graph.name(), nodes = order.len(), "resolved graph");
        graph.mark_resolved(order);
        trace!("{graph}");
        Ok(())
    }

    fn propagate(
        &self,
        graph: &Graph,
        order: &[NodeId],
    ) -> GraphResult<HashMap<ValueId, TypeInfo>> {
        let mut staged: HashMap<ValueId, TypeInfo> = HashMap::new();

        for id in order {
            let node = graph.node(*id)?;
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                let known = match staged.get(input) {
                    Some(info) => Some(info.clone()),
                    None => {
                        let value = graph.value(*input)?;
                        value
                            .dtype
                            .map(|dtype| TypeInfo::new(dtype, value.shape.clone()))
                    }
                };
                let Some(info) = known else {
                    return Err(GraphError::TypeInference {
                        node: node.name.clone(),
                        value: Some(graph.value_name(*input).to_string()),
                        reason: "input dtype is unknown".to_string(),
                    });
                };
                inputs.push(info);
            }

            let Some(schema) = self.schemas.schema(&node.op) else {
                for output in &node.outputs {
                    if graph.value(*output)?.dtype.is_none() {
                        return Err(GraphError::TypeInference {
                            node: node.name.clone(),
                            value: Some(graph.value_name(*output).to_string()),
                            reason: format!("no schema for `{}` and no declared dtype", node.op),
                        });
                    }
                }
                continue;
            };

            let failure = |value: Option<ValueId>, reason: String| GraphError::TypeInference {
                node: node.name.clone(),
                value: value.map(|v| graph.value_name(v).to_string()),
                reason,
            };
            schema
                .check_arity(node.inputs.len(), node.outputs.len())
                .map_err(|reason| failure(None, reason))?;
            let inferred = (schema.infer)(&InferenceRequest {
                node: &node.name,
                inputs: &inputs,
                attributes: &node.attributes,
            })
            .map_err(|reason| failure(None, reason))?;

            for (output, info) in node.outputs.iter().zip(inferred) {
                let declared = graph.value(*output)?;
                if let Some(dtype) = declared.dtype {
                    if dtype != info.dtype {
                        return Err(failure(
                            Some(*output),
                            format!("declared {dtype} but inferred {}", info.dtype),
                        ));
                    }
                }
                if let (Some(have), Some(want)) = (&declared.shape, &info.shape) {
                    if have.conflicts_with(want) {
                        return Err(failure(
                            Some(*output),
                            format!("declared shape {have} but inferred {want}"),
                        ));
                    }
                }
                staged.insert(*output, info);
            }
        }

        Ok(staged)
    }
}

/// Fills in graph inputs and outputs for sides that were never declared explicitly.
fn infer_boundary(graph: &mut Graph) {
    if !graph.has_explicit_inputs() {
        let inputs: Vec<ValueId> = graph
            .values()
            .filter(|v| graph.producer_of(v.id).is_none() && !graph.uses_of(v.id).is_empty())
            .map(|v| v.id)
            .collect();
        graph.set_implicit_inputs(inputs);
    }
    if !graph.has_explicit_outputs() {
        let outputs: Vec<ValueId> = graph
            .values()
            .filter(|v| graph.producer_of(v.id).is_some() && graph.uses_of(v.id).is_empty())
            .map(|v| v.id)
            .collect();
        graph.set_implicit_outputs(outputs);
    }
}

fn check_structure(graph: &Graph) -> GraphResult<()> {
    for node in graph.nodes() {
        for input in &node.inputs {
            if graph.producer_of(*input).is_none() && !graph.is_graph_input(*input) {
                return Err(GraphError::UndefinedValue {
                    node: node.name.clone(),
                    value: graph.value_name(*input).to_string(),
                });
            }
        }
    }
    for output in graph.graph_outputs() {
        let defined = graph.value(*output).is_ok()
            && (graph.producer_of(*output).is_some() || graph.is_graph_input(*output));
        if !defined {
            return Err(GraphError::UndefinedOutput {
                value: graph.value_name(*output).to_string(),
            });
        }
    }
    Ok(())
}

fn check_operators(graph: &Graph, oracle: &dyn CapabilityOracle) -> GraphResult<()> {
    for node in graph.nodes() {
        if !oracle.is_known(&node.op) {
            return Err(GraphError::UnsupportedOperator {
                node: node.name.clone(),
                op: node.op.to_string(),
                backend: None,
            });
        }
    }
    Ok(())
}

impl Graph {
    /// Resolves the graph against `schemas` without an oracle check.
    pub fn resolve(&mut self, schemas: &dyn SchemaRegistry) -> GraphResult<()> {
        Resolver::new(schemas).resolve(self)
    }
}
