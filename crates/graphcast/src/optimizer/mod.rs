//! Pass infrastructure shared by the conversion passes and the pipeline.

mod context;

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;

pub use context::{OptimizeConfig, OptimizeContext};

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of sweeps executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Nodes added by the pass.
    pub inserted_nodes: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            inserted_nodes: self.inserted_nodes + other.inserted_nodes,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

/// Canonical interface implemented by graph rewrite passes.
///
/// Passes require a resolved graph and either apply their whole rewrite or leave the graph
/// as it was.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext<'_>) -> GraphResult<PassResult>;
}

/// Fails with [`GraphError::NotResolved`] unless `graph` carries a current resolution.
pub(crate) fn ensure_resolved(graph: &Graph, pass: &str) -> GraphResult<()> {
    if graph.is_resolved() {
        Ok(())
    } else {
        Err(GraphError::NotResolved {
            graph: graph.name().to_string(),
            pass: pass.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_counters() {
        let first = PassResult {
            changed: false,
            iterations: 1,
            rewrites_applied: 0,
            inserted_nodes: 0,
            erased_nodes: 0,
        };
        let second = PassResult {
            changed: true,
            iterations: 2,
            rewrites_applied: 3,
            inserted_nodes: 1,
            erased_nodes: 2,
        };
        let merged = first.merge(second);
        assert!(merged.changed);
        assert_eq!(merged.iterations, 3);
        assert_eq!(merged.rewrites_applied, 3);
        assert_eq!(merged.erased_nodes, 2);
    }

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let cfg = OptimizeConfig::from_json(r#"{ "fixed_point_iters": 9 }"#).unwrap();
        assert_eq!(cfg.fixed_point_iters, 9);
        assert_eq!(cfg.max_elimination_iters, OptimizeConfig::default().max_elimination_iters);
    }
}
