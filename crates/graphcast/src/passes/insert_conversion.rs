use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::capability::{CachedOracle, CapabilityOracle};
use crate::env;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, NodeId, ValueId};
use crate::optimizer::{ensure_resolved, GraphPass, OptimizeContext, PassResult};
use crate::spec::{Attribute, Backend, DType, OpId, CAST_TO_ATTR};

use super::analysis::{EdgeSink, Mismatch, MismatchAnalyzer, MismatchPlan};

/// Retyped graph output whose producer moves to a fresh value.
#[derive(Debug, Clone)]
struct SplitOutput {
    node: NodeId,
    position: usize,
    original: ValueId,
    fresh_name: String,
    dtype: DType,
}

/// One conversion node serving every reader of `source` that requires `to`.
#[derive(Debug, Clone)]
struct Conversion {
    node_name: String,
    input_name: String,
    output_name: String,
    to: DType,
    backend: Backend,
    readers: Vec<(NodeId, usize)>,
}

#[derive(Debug, Default)]
struct InsertionPlan {
    splits: Vec<SplitOutput>,
    retype_in_place: Vec<(ValueId, DType)>,
    conversions: Vec<Conversion>,
}

/// Inserts `Cast` nodes on every edge whose producer type differs from what the reader
/// needs on its backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsertConversionPass;

impl InsertConversionPass {
    const NAME: &'static str = "insert-conversion";

    fn plan(
        &self,
        graph: &Graph,
        analysis: MismatchPlan,
        oracle: &dyn CapabilityOracle,
    ) -> GraphResult<InsertionPlan> {
        let mut plan = InsertionPlan::default();
        let mut reserved_values: HashSet<String> = HashSet::new();
        let mut reserved_nodes: HashSet<String> = HashSet::new();
        let mut split_names: HashMap<ValueId, String> = HashMap::new();

        for retype in &analysis.retyped {
            if graph.is_graph_output(retype.value) {
                let base = format!("{}_{}", graph.value_name(retype.value), retype.effective);
                let fresh_name = graph.unique_value_name(&base, &reserved_values);
                reserved_values.insert(fresh_name.clone());
                split_names.insert(retype.value, fresh_name.clone());
                plan.splits.push(SplitOutput {
                    node: retype.node,
                    position: retype.position,
                    original: retype.value,
                    fresh_name,
                    dtype: retype.effective,
                });
            } else {
                plan.retype_in_place.push((retype.value, retype.effective));
            }
        }

        let mut groups: Vec<((ValueId, DType), Vec<&Mismatch>)> = Vec::new();
        for mismatch in &analysis.mismatches {
            let key = (mismatch.value, mismatch.required);
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(mismatch),
                None => groups.push((key, vec![mismatch])),
            }
        }

        for ((value, to), members) in groups {
            let original_name = graph.value_name(value).to_string();
            let input_name = split_names
                .get(&value)
                .cloned()
                .unwrap_or_else(|| original_name.clone());
            let from = members[0].source;

            let feeds_graph_output = members
                .iter()
                .any(|m| matches!(m.sink, EdgeSink::GraphOutput { .. }));
            let output_name = if feeds_graph_output {
                original_name
            } else {
                let name = graph
                    .unique_value_name(&format!("{input_name}_to_{to}"), &reserved_values);
                reserved_values.insert(name.clone());
                name
            };
            let node_name =
                graph.unique_node_name(&format!("{input_name}_cast_{to}"), &reserved_nodes);
            reserved_nodes.insert(node_name.clone());

            let backend = pick_backend(oracle, &members, from, to).ok_or_else(|| {
                GraphError::NoConversionPath {
                    value: input_name.clone(),
                    from,
                    to,
                    tried: candidate_backends(oracle, &members)
                        .iter()
                        .map(|b| b.to_string())
                        .collect(),
                }
            })?;

            let readers = members
                .iter()
                .filter_map(|m| match m.sink {
                    EdgeSink::Node { node, position } => Some((node, position)),
                    EdgeSink::GraphOutput { .. } => None,
                })
                .collect();
            plan.conversions.push(Conversion {
                node_name,
                input_name,
                output_name,
                to,
                backend,
                readers,
            });
        }

        Ok(plan)
    }
}

/// Reader backends in first-seen order, then the default backend.
fn candidate_backends(oracle: &dyn CapabilityOracle, members: &[&Mismatch]) -> Vec<Backend> {
    let mut backends: Vec<Backend> = Vec::new();
    for member in members {
        if !backends.contains(&member.consumer_backend) {
            backends.push(member.consumer_backend.clone());
        }
    }
    let default = oracle.default_backend();
    if !backends.contains(&default) {
        backends.push(default);
    }
    backends
}

fn pick_backend(
    oracle: &dyn CapabilityOracle,
    members: &[&Mismatch],
    from: DType,
    to: DType,
) -> Option<Backend> {
    candidate_backends(oracle, members)
        .into_iter()
        .find(|backend| oracle.can_convert(from, to, backend))
}

fn apply(graph: &mut Graph, plan: &InsertionPlan) -> GraphResult<()> {
    for split in &plan.splits {
        let fresh = graph.split_output(split.node, split.position, &split.fresh_name, split.dtype)?;
        graph.replace_all_uses(split.original, fresh)?;
    }
    for (value, dtype) in &plan.retype_in_place {
        graph.set_value_dtype(*value, *dtype)?;
    }
    for conversion in &plan.conversions {
        let source_shape = graph
            .value_by_name(&conversion.input_name)
            .and_then(|v| v.shape.clone());
        let node = graph.add_node(
            &conversion.node_name,
            OpId::cast(),
            &[conversion.input_name.as_str()],
            &[conversion.output_name.as_str()],
        )?;
        graph.set_attribute(node, CAST_TO_ATTR, Attribute::DType(conversion.to))?;
        graph.set_backend(node, Some(conversion.backend.clone()))?;
        let output =
            graph.declare_value(&conversion.output_name, Some(conversion.to), source_shape);
        for (reader, position) in &conversion.readers {
            graph.replace_input(*reader, *position, output)?;
        }
        debug!(
            node = %conversion.node_name,
            input = %conversion.input_name,
            to = %conversion.to,
            backend = %conversion.backend,
            readers = conversion.readers.len(),
            "inserted conversion"
        );
    }
    Ok(())
}

impl GraphPass for InsertConversionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext<'_>) -> GraphResult<PassResult> {
        ensure_resolved(graph, Self::NAME)?;
        let oracle = CachedOracle::new(cx.oracle());
        let analysis = MismatchAnalyzer::new(&oracle, cx.schemas()).analyze(graph)?;
        if analysis.is_empty() {
            return Ok(PassResult {
                iterations: 1,
                ..PassResult::default()
            });
        }

        let plan = self.plan(graph, analysis, &oracle)?;
        graph.try_rewrite(|g| apply(g, &plan))?;

        let inserted = plan.conversions.len();
        let result = PassResult {
            changed: true,
            iterations: 1,
            rewrites_applied: inserted + plan.splits.len() + plan.retype_in_place.len(),
            inserted_nodes: inserted,
            erased_nodes: 0,
        };
        if env::pass_stats_enabled() {
            info!(
                pass = Self::NAME,
                graph = %graph.name(),
                inserted,
                split_outputs = plan.splits.len(),
                retyped = plan.retype_in_place.len(),
                "pass finished"
            );
        }
        Ok(result)
    }
}
