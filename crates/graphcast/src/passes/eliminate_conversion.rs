use tracing::{debug, info};

use crate::capability::{CachedOracle, CapabilityOracle};
use crate::env;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, NodeId, ValueId};
use crate::optimizer::{ensure_resolved, GraphPass, OptimizeContext, PassResult};
use crate::spec::DType;

/// Run of `Cast` nodes `c1 .. ck` where every `ci` before `ck` feeds only `ci+1`.
///
/// `values[0]` is the chain source and `values[i]` the output of `casts[i - 1]`.
#[derive(Debug)]
struct Chain {
    casts: Vec<NodeId>,
    values: Vec<ValueId>,
    types: Vec<DType>,
}

impl Chain {
    fn terminal(&self) -> NodeId {
        self.casts[self.casts.len() - 1]
    }

    fn len(&self) -> usize {
        self.casts.len()
    }
}

#[derive(Debug, Default)]
struct SweepStats {
    rewrites: usize,
    erased: usize,
}

/// Removes conversions made redundant by adjacent conversions.
///
/// Conversions with several readers, or whose output is a graph output, are branch points:
/// they end chains and are never removed by a non-identity collapse.
#[derive(Debug, Default, Clone, Copy)]
pub struct EliminateRedundantConversionPass;

impl EliminateRedundantConversionPass {
    const NAME: &'static str = "eliminate-conversion";
}

/// Whether `node` is a cast that only feeds another cast and is invisible to callers.
fn is_intermediate(graph: &Graph, node: NodeId) -> bool {
    let Ok(current) = graph.node(node) else {
        return false;
    };
    if !current.is_cast() {
        return false;
    }
    let [output] = current.outputs.as_slice() else {
        return false;
    };
    if graph.is_graph_output(*output) {
        return false;
    }
    match graph.uses_of(*output) {
        [only] => graph.node(only.node).map(|n| n.is_cast()).unwrap_or(false),
        _ => false,
    }
}

fn dtype_of(graph: &Graph, value: ValueId) -> GraphResult<DType> {
    graph.value(value)?.dtype.ok_or_else(|| GraphError::TypeInference {
        node: graph
            .producer_of(value)
            .and_then(|p| graph.node(p).ok())
            .map(|n| n.name.clone())
            .unwrap_or_default(),
        value: Some(graph.value_name(value).to_string()),
        reason: "conversion chain value has no dtype".to_string(),
    })
}

/// Walks backwards from `terminal` collecting the chain it ends.
fn collect_chain(graph: &Graph, terminal: NodeId) -> GraphResult<Option<Chain>> {
    let node = graph.node(terminal)?;
    if !node.is_cast() || is_intermediate(graph, terminal) {
        return Ok(None);
    }
    let ([input], [output]) = (node.inputs.as_slice(), node.outputs.as_slice()) else {
        return Ok(None);
    };

    let mut casts = vec![terminal];
    let mut values = vec![*output, *input];
    let mut cursor = *input;
    while let Some(producer) = graph.producer_of(cursor) {
        if !is_intermediate(graph, producer) {
            break;
        }
        let [source] = graph.node(producer)?.inputs.as_slice() else {
            break;
        };
        casts.push(producer);
        values.push(*source);
        cursor = *source;
    }
    casts.reverse();
    values.reverse();

    let types = values
        .iter()
        .map(|value| dtype_of(graph, *value))
        .collect::<GraphResult<Vec<_>>>()?;
    Ok(Some(Chain {
        casts,
        values,
        types,
    }))
}

/// Removes `casts` from last to first; each one's output must be unread by then.
fn remove_casts(graph: &mut Graph, casts: &[NodeId]) -> GraphResult<usize> {
    for cast in casts.iter().rev() {
        graph.remove_node(*cast)?;
    }
    Ok(casts.len())
}

/// Rewires the terminal onto the earliest chain value at or after `start` that its backend
/// can convert to the target type.
///
/// With `cut` set, reaching a value that already has the target type removes the rest of
/// the chain, terminal included, and its readers take that value directly.
fn shorten(
    graph: &mut Graph,
    chain: &Chain,
    start: usize,
    cut: bool,
    oracle: &dyn CapabilityOracle,
) -> GraphResult<SweepStats> {
    let k = chain.len();
    let terminal = chain.terminal();
    let target = chain.types[k];
    let backend = graph
        .node(terminal)?
        .backend
        .clone()
        .unwrap_or_else(|| oracle.default_backend());

    for i in start..k {
        if cut && chain.types[i] == target {
            graph.replace_all_uses(chain.values[k], chain.values[i])?;
            let erased = remove_casts(graph, &chain.casts[i..])?;
            debug!(chain = k, to = %target, erased, "cut conversion chain at matching value");
            return Ok(SweepStats {
                rewrites: 1,
                erased,
            });
        }
        if i == k - 1 || !oracle.can_convert(chain.types[i], target, &backend) {
            continue;
        }
        graph.replace_input(terminal, 0, chain.values[i])?;
        let erased = remove_casts(graph, &chain.casts[i..k - 1])?;
        debug!(
            chain = k,
            from = %chain.types[i],
            to = %target,
            erased,
            "shortened conversion chain"
        );
        return Ok(SweepStats {
            rewrites: 1,
            erased,
        });
    }
    Ok(SweepStats::default())
}

fn collapse(
    graph: &mut Graph,
    chain: &Chain,
    oracle: &dyn CapabilityOracle,
) -> GraphResult<SweepStats> {
    let k = chain.len();
    let source = chain.values[0];
    let target = chain.types[k];
    let terminal_out = chain.values[k];

    if chain.types[0] == target {
        let readers = graph.uses_of(terminal_out).len();
        if readers <= 1 && !graph.is_graph_output(terminal_out) {
            graph.replace_all_uses(terminal_out, source)?;
            let erased = remove_casts(graph, &chain.casts)?;
            debug!(chain = k, "removed identity conversion chain");
            return Ok(SweepStats {
                rewrites: 1,
                erased,
            });
        }
        // Branch point stays; it moves as close to the source as its backend allows.
        return shorten(graph, chain, 0, false, oracle);
    }

    let start = (1..k)
        .find(|j| chain.types[*j] == target)
        .map(|j| j - 1)
        .unwrap_or(0);
    shorten(graph, chain, start, !graph.is_graph_output(terminal_out), oracle)
}

fn sweep(graph: &mut Graph, oracle: &dyn CapabilityOracle) -> GraphResult<SweepStats> {
    let terminals: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.is_cast())
        .map(|n| n.id)
        .collect();

    let mut stats = SweepStats::default();
    for terminal in terminals {
        if graph.node(terminal).is_err() {
            continue;
        }
        let Some(chain) = collect_chain(graph, terminal)? else {
            continue;
        };
        let applied = collapse(graph, &chain, oracle)?;
        stats.rewrites += applied.rewrites;
        stats.erased += applied.erased;
    }
    Ok(stats)
}

impl GraphPass for EliminateRedundantConversionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext<'_>) -> GraphResult<PassResult> {
        ensure_resolved(graph, Self::NAME)?;
        let oracle = CachedOracle::new(cx.oracle());
        let max_iters = cx.config().max_elimination_iters.max(1);

        let result = graph.try_rewrite(|g| {
            let mut result = PassResult::default();
            while result.iterations < max_iters {
                let stats = sweep(g, &oracle)?;
                result.iterations += 1;
                if stats.rewrites == 0 {
                    break;
                }
                result.changed = true;
                result.rewrites_applied += stats.rewrites;
                result.erased_nodes += stats.erased;
            }
            Ok(result)
        })?;

        if env::pass_stats_enabled() {
            info!(
                pass = Self::NAME,
                graph = %graph.name(),
                iterations = result.iterations,
                rewrites = result.rewrites_applied,
                erased = result.erased_nodes,
                "pass finished"
            );
        }
        Ok(result)
    }
}
