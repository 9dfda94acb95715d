use std::slice;

use super::{Graph, Node, Use, ValueId};

/// Lazy one-hop walk over the producers of a node's inputs.
///
/// Graph inputs have no producer and are skipped. A clone taken before advancing replays
/// the same edges.
#[derive(Clone)]
pub struct InputNodes<'g> {
    graph: &'g Graph,
    inputs: slice::Iter<'g, ValueId>,
}

impl<'g> InputNodes<'g> {
    pub(super) fn new(graph: &'g Graph, inputs: &'g [ValueId]) -> Self {
        Self {
            graph,
            inputs: inputs.iter(),
        }
    }
}

impl<'g> Iterator for InputNodes<'g> {
    type Item = &'g Node;

    fn next(&mut self) -> Option<Self::Item> {
        for value in self.inputs.by_ref() {
            if let Some(producer) = self.graph.producer_of(*value) {
                if let Ok(node) = self.graph.node(producer) {
                    return Some(node);
                }
            }
        }
        None
    }
}

/// Lazy one-hop walk over the consumers of a node's outputs, one item per edge.
#[derive(Clone)]
pub struct OutputNodes<'g> {
    graph: &'g Graph,
    outputs: slice::Iter<'g, ValueId>,
    uses: slice::Iter<'g, Use>,
}

impl<'g> OutputNodes<'g> {
    pub(super) fn new(graph: &'g Graph, outputs: &'g [ValueId]) -> Self {
        Self {
            graph,
            outputs: outputs.iter(),
            uses: [].iter(),
        }
    }
}

impl<'g> Iterator for OutputNodes<'g> {
    type Item = &'g Node;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(use_) = self.uses.next() {
                if let Ok(node) = self.graph.node(use_.node) {
                    return Some(node);
                }
                continue;
            }
            let value = self.outputs.next()?;
            self.uses = self.graph.uses_of(*value).iter();
        }
    }
}
