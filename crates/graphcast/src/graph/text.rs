use std::fmt::{self, Write};

use super::{Graph, NodeId, ValueId};

impl Graph {
    fn fmt_value(&self, out: &mut String, value: ValueId, typed: bool) -> fmt::Result {
        let Ok(value) = self.value(value) else {
            return out.write_str("%<dead>");
        };
        write!(out, "%{}", value.name)?;
        if typed {
            match value.dtype {
                Some(dtype) => write!(out, ": {dtype}")?,
                None => out.write_str(": ?")?,
            }
            if let Some(shape) = &value.shape {
                write!(out, "[{shape}]")?;
            }
        }
        Ok(())
    }

    fn fmt_value_list(&self, out: &mut String, values: &[ValueId], typed: bool) -> fmt::Result {
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                out.write_str(", ")?;
            }
            self.fmt_value(out, *value, typed)?;
        }
        Ok(())
    }

    fn fmt_node(&self, out: &mut String, id: NodeId) -> fmt::Result {
        let Ok(node) = self.node(id) else {
            return Ok(());
        };
        write!(out, "  {} = {}", node.name, node.op)?;
        if let Some(backend) = &node.backend {
            write!(out, "[{backend}]")?;
        }
        if !node.attributes.is_empty() {
            let attrs: Vec<String> = node
                .attributes
                .iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect();
            write!(out, "{{{}}}", attrs.join(", "))?;
        }
        out.write_char('(')?;
        self.fmt_value_list(out, &node.inputs, false)?;
        out.write_str(") -> (")?;
        self.fmt_value_list(out, &node.outputs, true)?;
        out.write_str(")\n")
    }

    /// Renders the graph in a compact line-per-node text form.
    ///
    /// Nodes are listed in topological order when the graph is resolved and in insertion
    /// order otherwise.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> fmt::Result {
        write!(out, "graph @{}(", self.name)?;
        self.fmt_value_list(out, &self.inputs, true)?;
        out.write_str(") -> (")?;
        self.fmt_value_list(out, &self.outputs, true)?;
        out.write_str(") {\n")?;
        let order: Vec<NodeId> = match self.topological_order() {
            Some(order) => order.to_vec(),
            None => self.nodes().map(|n| n.id).collect(),
        };
        for id in order {
            self.fmt_node(out, id)?;
        }
        out.write_str("}\n")
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
