use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::env;
use crate::error::GraphError;
use crate::graph::Graph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};
use crate::passes::{EliminateRedundantConversionPass, InsertConversionPass};
use crate::resolver::Resolver;

const RESOLVE_STEP: &str = "resolve";

#[derive(Debug, Error)]
#[error("pipeline step `{step}` failed on graph `{graph}`: {source}")]
pub struct PipelineError {
    pub graph: String,
    pub step: String,
    #[source]
    pub source: GraphError,
}

pub enum Step {
    /// Re-resolves the graph against the context's schemas and oracle.
    Resolve,
    Pass(Arc<dyn GraphPass>),
    FixedPoint {
        /// `None` takes the bound from the environment or the optimize config.
        max_iters: Option<usize>,
        steps: Vec<Step>,
    },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn resolve(&mut self) {
        self.steps.push(Step::Resolve);
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        self.push_fixed_point(Some(max_iters.max(1)), build);
    }

    /// Fixed point bounded by `GRAPHCAST_FIXED_POINT_ITERS` or the optimize config.
    pub fn configured_fixed_point<F>(&mut self, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        self.push_fixed_point(None, build);
    }

    fn push_fixed_point<F>(&mut self, max_iters: Option<usize>, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters,
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineOptimizer {
    steps: Vec<Step>,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PipelineOptimizer {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            log_stats: env::pass_stats_enabled(),
            run_counter: AtomicUsize::new(0),
        }
    }

    /// Resolve, insert conversions, resolve, eliminate redundant conversions to a fixed
    /// point, resolve.
    pub fn conversion_pipeline() -> Self {
        let mut builder = PipelineBuilder::new();
        builder.resolve();
        builder.pass(Arc::new(InsertConversionPass));
        builder.resolve();
        builder.configured_fixed_point(|p| {
            p.pass(Arc::new(EliminateRedundantConversionPass));
            p.resolve();
        });
        builder.resolve();
        Self::new(builder.finish())
    }

    pub fn optimize(
        &self,
        graph: &mut Graph,
        cx: &mut OptimizeContext<'_>,
    ) -> Result<PassResult, PipelineError> {
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let mut totals = PassResult::default();
        run_steps(&self.steps, graph, cx, run_id, &mut totals, self.log_stats)?;
        debug!(
            graph = %graph.name(),
            run_id,
            changed = totals.changed,
            nodes = graph.node_count(),
            "pipeline finished"
        );
        Ok(totals)
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut Graph,
    cx: &mut OptimizeContext<'_>,
    run_id: usize,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool, PipelineError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Resolve => {
                Resolver::new(cx.schemas())
                    .with_oracle(cx.oracle())
                    .resolve(graph)
                    .map_err(|source| failed(graph, RESOLVE_STEP, source))?;
            }
            Step::Pass(pass) => {
                let stats = pass
                    .run(graph, cx)
                    .map_err(|source| failed(graph, pass.name(), source))?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    info!(
                        run_id,
                        graph = %graph.name(),
                        pass = pass.name(),
                        changed = stats.changed,
                        iterations = stats.iterations,
                        rewrites = stats.rewrites_applied,
                        inserted = stats.inserted_nodes,
                        erased = stats.erased_nodes,
                        nodes = graph.node_count(),
                        "optimizer pass stats"
                    );
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let max_iters = (*max_iters)
                    .or_else(env::fixed_point_iters)
                    .unwrap_or(cx.config().fixed_point_iters)
                    .max(1);
                let mut iter = 0usize;
                loop {
                    if iter >= max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, graph, cx, run_id, &mut local, log_stats)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}

fn failed(graph: &Graph, step: &str, source: GraphError) -> PipelineError {
    PipelineError {
        graph: graph.name().to_string(),
        step: step.to_string(),
        source,
    }
}
