//! Arena-backed computation graph.
//!
//! Nodes and values live in two arenas indexed by [`NodeId`] and [`ValueId`]. Nodes refer
//! to values by id, values never own nodes; the producer/consumer relation is kept in a
//! separate [`index::UseIndex`]. Ids are never reused, so id order is insertion order.

mod index;
mod iter;
mod text;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::spec::{Attribute, Backend, DType, OpId, Shape};

pub use index::Use;
pub use iter::{InputNodes, OutputNodes};

/// Stable identifier of a node inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable identifier of a value inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// One operator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: OpId,
    /// Execution target; `None` defers to the oracle's default backend.
    pub backend: Option<Backend>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    pub fn op_type(&self) -> &str {
        &self.op.op_type
    }

    pub fn domain(&self) -> &str {
        &self.op.domain
    }

    pub fn is_cast(&self) -> bool {
        self.op.is_cast()
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }
}

/// A named data slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub id: ValueId,
    pub name: String,
    pub dtype: Option<DType>,
    pub shape: Option<Shape>,
}

#[derive(Debug, Clone, PartialEq)]
struct Resolution {
    order: Vec<NodeId>,
}

/// Mutable graph IR holding nodes and values for one computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    node_names: HashMap<String, NodeId>,
    value_names: HashMap<String, ValueId>,
    index: index::UseIndex,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    explicit_inputs: bool,
    explicit_outputs: bool,
    resolution: Option<Resolution>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            values: Vec::new(),
            node_names: HashMap::new(),
            value_names: HashMap::new(),
            index: index::UseIndex::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            explicit_inputs: false,
            explicit_outputs: false,
            resolution: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares an explicit graph input. Turns off implicit input inference.
    pub fn add_input(
        &mut self,
        name: &str,
        dtype: DType,
        shape: Option<Shape>,
    ) -> GraphResult<ValueId> {
        if let Some(existing) = self.value_names.get(name).copied() {
            let declared_input = self.explicit_inputs && self.inputs.contains(&existing);
            if declared_input || self.index.producer_of(existing).is_some() {
                return Err(self.duplicate(name));
            }
        }
        let id = self.get_or_create_value(name);
        self.set_declared(id, Some(dtype), shape);
        if !self.explicit_inputs {
            self.inputs.clear();
            self.explicit_inputs = true;
        }
        self.inputs.push(id);
        self.invalidate();
        Ok(id)
    }

    /// Declares an explicit graph output. Turns off implicit output inference.
    pub fn add_output(&mut self, name: &str) -> GraphResult<ValueId> {
        if let Some(existing) = self.value_names.get(name) {
            if self.explicit_outputs && self.outputs.contains(existing) {
                return Err(self.duplicate(name));
            }
        }
        let id = self.get_or_create_value(name);
        if !self.explicit_outputs {
            self.outputs.clear();
            self.explicit_outputs = true;
        }
        self.outputs.push(id);
        self.invalidate();
        Ok(id)
    }

    /// Creates the value if needed and records any provided declared type.
    pub fn declare_value(
        &mut self,
        name: &str,
        dtype: Option<DType>,
        shape: Option<Shape>,
    ) -> ValueId {
        let id = self.get_or_create_value(name);
        self.set_declared(id, dtype, shape);
        self.invalidate();
        id
    }

    /// Adds a node reading `inputs` and producing `outputs`, all referenced by name.
    ///
    /// Inputs that do not exist yet are created unproduced. Outputs must not be produced
    /// by another node or be graph inputs. On error the graph is left untouched.
    pub fn add_node(
        &mut self,
        name: &str,
        op: OpId,
        inputs: &[&str],
        outputs: &[&str],
    ) -> GraphResult<NodeId> {
        if self.node_names.contains_key(name) {
            return Err(self.duplicate(name));
        }
        let mut seen = HashSet::new();
        for output in outputs {
            if !seen.insert(*output) {
                return Err(self.duplicate(output));
            }
            if let Some(existing) = self.value_names.get(*output).copied() {
                let declared_input = self.explicit_inputs && self.inputs.contains(&existing);
                if self.index.producer_of(existing).is_some() || declared_input {
                    return Err(self.duplicate(output));
                }
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let input_ids: Vec<ValueId> = inputs
            .iter()
            .map(|input| self.get_or_create_value(input))
            .collect();
        let output_ids: Vec<ValueId> = outputs
            .iter()
            .map(|output| self.get_or_create_value(output))
            .collect();

        for (position, value) in input_ids.iter().enumerate() {
            self.index.add_use(*value, Use { node: id, position });
        }
        for value in &output_ids {
            self.index.set_producer(*value, id);
        }
        if !self.explicit_inputs {
            self.inputs.retain(|value| !output_ids.contains(value));
        }

        self.nodes.push(Some(Node {
            id,
            name: name.to_string(),
            op,
            backend: None,
            inputs: input_ids,
            outputs: output_ids,
            attributes: BTreeMap::new(),
        }));
        self.node_names.insert(name.to_string(), id);
        self.invalidate();
        Ok(id)
    }

    pub fn set_backend(&mut self, node: NodeId, backend: Option<Backend>) -> GraphResult<()> {
        self.node_mut(node)?.backend = backend;
        self.invalidate();
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        node: NodeId,
        key: impl Into<String>,
        value: Attribute,
    ) -> GraphResult<()> {
        self.node_mut(node)?.attributes.insert(key.into(), value);
        self.invalidate();
        Ok(())
    }

    /// Overwrites the dtype recorded on a value.
    pub fn set_value_dtype(&mut self, value: ValueId, dtype: DType) -> GraphResult<()> {
        self.value_mut(value)?.dtype = Some(dtype);
        self.invalidate();
        Ok(())
    }

    /// Removes a node whose outputs are no longer consumed, returning it.
    pub fn remove_node(&mut self, node: NodeId) -> GraphResult<Node> {
        let current = self.node(node)?;
        for output in &current.outputs {
            let users = self.index.users_of(*output);
            let external = self.outputs.contains(output);
            if !users.is_empty() || external {
                let mut consumers: Vec<String> = users
                    .iter()
                    .filter_map(|u| self.node(u.node).ok().map(|n| n.name.clone()))
                    .collect();
                if external {
                    consumers.push("<graph output>".to_string());
                }
                return Err(GraphError::DanglingConsumer {
                    node: current.name.clone(),
                    value: self.value_name(*output).to_string(),
                    consumers,
                });
            }
        }

        let removed = self.nodes[node.0 as usize]
            .take()
            .ok_or(GraphError::UnknownNode(node.0))?;
        self.node_names.remove(&removed.name);
        for (position, input) in removed.inputs.iter().enumerate() {
            self.index.remove_use(*input, Use { node, position });
        }
        for output in &removed.outputs {
            self.index.forget_value(*output);
            self.outputs.retain(|o| o != output);
            if let Some(value) = self.values[output.0 as usize].take() {
                self.value_names.remove(&value.name);
            }
        }
        debug!(graph = %self.name, node = %removed.name, "removed node");
        self.invalidate();
        Ok(removed)
    }

    /// Points input `position` of `node` at `value`.
    pub fn replace_input(
        &mut self,
        node: NodeId,
        position: usize,
        value: ValueId,
    ) -> GraphResult<()> {
        self.value(value)?;
        let current = self.node(node)?;
        let Some(previous) = current.inputs.get(position).copied() else {
            return Err(GraphError::InvalidPosition {
                node: current.name.clone(),
                position,
            });
        };
        if previous == value {
            return Ok(());
        }
        self.node_mut(node)?.inputs[position] = value;
        self.index
            .update_use(Use { node, position }, previous, value);
        self.invalidate();
        Ok(())
    }

    /// Redirects every consuming edge of `from` to `to`, returning the number of edges
    /// moved. Graph outputs keep referring to `from`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> GraphResult<usize> {
        self.value(from)?;
        self.value(to)?;
        if from == to {
            return Ok(0);
        }
        let uses = self.index.users_of(from).to_vec();
        for use_ in &uses {
            self.replace_input(use_.node, use_.position, to)?;
        }
        Ok(uses.len())
    }

    /// Rebinds output `position` of `node` to a fresh value named `fresh_name`, leaving
    /// the previous value unproduced so another node can claim it.
    pub fn split_output(
        &mut self,
        node: NodeId,
        position: usize,
        fresh_name: &str,
        dtype: DType,
    ) -> GraphResult<ValueId> {
        if self.value_names.contains_key(fresh_name) {
            return Err(self.duplicate(fresh_name));
        }
        let current = self.node(node)?;
        let Some(previous) = current.outputs.get(position).copied() else {
            return Err(GraphError::InvalidPosition {
                node: current.name.clone(),
                position,
            });
        };
        let shape = self.value(previous)?.shape.clone();
        let fresh = self.get_or_create_value(fresh_name);
        self.set_declared(fresh, Some(dtype), shape);
        self.node_mut(node)?.outputs[position] = fresh;
        self.index.clear_producer(previous);
        self.index.set_producer(fresh, node);
        self.invalidate();
        Ok(fresh)
    }

    /// Runs `edit` against the graph and restores the prior state if it fails.
    pub fn try_rewrite<T, F>(&mut self, edit: F) -> GraphResult<T>
    where
        F: FnOnce(&mut Graph) -> GraphResult<T>,
    {
        let snapshot = self.clone();
        match edit(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(graph = %self.name, error = %err, "rolling back rewrite");
                *self = snapshot;
                Err(err)
            }
        }
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(GraphError::UnknownNode(id.0))
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        let id = self.node_names.get(name)?;
        self.node(*id).ok()
    }

    pub fn value(&self, id: ValueId) -> GraphResult<&Value> {
        self.values
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| GraphError::UnknownValue(id.to_string()))
    }

    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        let id = self.value_names.get(name)?;
        self.value(*id).ok()
    }

    /// Name of a live value, or an empty string for stale ids.
    pub fn value_name(&self, id: ValueId) -> &str {
        self.value(id).map(|v| v.name.as_str()).unwrap_or("")
    }

    pub fn producer_of(&self, value: ValueId) -> Option<NodeId> {
        self.index.producer_of(value)
    }

    /// Consuming edges of `value`, in the order they were created.
    pub fn uses_of(&self, value: ValueId) -> &[Use] {
        self.index.users_of(value)
    }

    /// Distinct consuming nodes of `value`, in id order.
    pub fn consumers_of(&self, value: ValueId) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.uses_of(value).iter().map(|u| u.node).collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Live nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter_map(|slot| slot.as_ref())
    }

    /// Live values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.values.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn graph_inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn graph_outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn is_graph_input(&self, value: ValueId) -> bool {
        self.inputs.contains(&value)
    }

    pub fn is_graph_output(&self, value: ValueId) -> bool {
        self.outputs.contains(&value)
    }

    /// One-hop predecessors of `node`, one item per produced input edge.
    pub fn input_nodes(&self, node: NodeId) -> GraphResult<InputNodes<'_>> {
        Ok(InputNodes::new(self, &self.node(node)?.inputs))
    }

    /// One-hop successors of `node`, one item per consuming edge.
    pub fn output_nodes(&self, node: NodeId) -> GraphResult<OutputNodes<'_>> {
        Ok(OutputNodes::new(self, &self.node(node)?.outputs))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Topological order recorded by the last successful resolve.
    pub fn topological_order(&self) -> Option<&[NodeId]> {
        self.resolution.as_ref().map(|r| r.order.as_slice())
    }

    pub(crate) fn clear_resolution(&mut self) {
        self.invalidate();
    }

    pub(crate) fn mark_resolved(&mut self, order: Vec<NodeId>) {
        self.resolution = Some(Resolution { order });
    }

    pub(crate) fn has_explicit_inputs(&self) -> bool {
        self.explicit_inputs
    }

    pub(crate) fn has_explicit_outputs(&self) -> bool {
        self.explicit_outputs
    }

    pub(crate) fn set_implicit_inputs(&mut self, inputs: Vec<ValueId>) {
        if !self.explicit_inputs {
            self.inputs = inputs;
        }
    }

    pub(crate) fn set_implicit_outputs(&mut self, outputs: Vec<ValueId>) {
        if !self.explicit_outputs {
            self.outputs = outputs;
        }
    }

    /// Records an inferred type without invalidating the resolution in progress.
    pub(crate) fn record_inferred(&mut self, value: ValueId, dtype: DType, shape: Option<Shape>) {
        if let Some(Some(slot)) = self.values.get_mut(value.0 as usize) {
            slot.dtype = Some(dtype);
            if slot.shape.is_none() {
                slot.shape = shape;
            }
        }
    }

    /// Returns `base`, or `base_<n>` for the smallest `n` not already taken.
    pub(crate) fn unique_value_name(&self, base: &str, reserved: &HashSet<String>) -> String {
        unique_name(base, |candidate| {
            self.value_names.contains_key(candidate) || reserved.contains(candidate)
        })
    }

    pub(crate) fn unique_node_name(&self, base: &str, reserved: &HashSet<String>) -> String {
        unique_name(base, |candidate| {
            self.node_names.contains_key(candidate) || reserved.contains(candidate)
        })
    }

    fn invalidate(&mut self) {
        self.resolution = None;
    }

    fn duplicate(&self, name: &str) -> GraphError {
        GraphError::DuplicateName {
            graph: self.name.clone(),
            name: name.to_string(),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(GraphError::UnknownNode(id.0))
    }

    fn value_mut(&mut self, id: ValueId) -> GraphResult<&mut Value> {
        self.values
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| GraphError::UnknownValue(id.to_string()))
    }

    fn get_or_create_value(&mut self, name: &str) -> ValueId {
        if let Some(id) = self.value_names.get(name) {
            return *id;
        }
        let id = ValueId(self.values.len() as u32);
        self.values.push(Some(Value {
            id,
            name: name.to_string(),
            dtype: None,
            shape: None,
        }));
        self.value_names.insert(name.to_string(), id);
        id
    }

    fn set_declared(&mut self, id: ValueId, dtype: Option<DType>, shape: Option<Shape>) {
        if let Some(Some(value)) = self.values.get_mut(id.0 as usize) {
            if dtype.is_some() {
                value.dtype = dtype;
            }
            if shape.is_some() {
                value.shape = shape;
            }
        }
    }
}

fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
