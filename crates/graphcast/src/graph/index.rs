use std::collections::HashMap;

use smallvec::SmallVec;

use super::{NodeId, ValueId};

/// One consuming edge: `node` reads the value at input `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Use {
    pub node: NodeId,
    pub position: usize,
}

/// Producer and consumer relations keyed by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UseIndex {
    producers: HashMap<ValueId, NodeId>,
    users: HashMap<ValueId, SmallVec<[Use; 4]>>,
}

impl UseIndex {
    pub(crate) fn producer_of(&self, value: ValueId) -> Option<NodeId> {
        self.producers.get(&value).copied()
    }

    /// Returns the recorded uses in insertion order.
    pub(crate) fn users_of(&self, value: ValueId) -> &[Use] {
        self.users
            .get(&value)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn set_producer(&mut self, value: ValueId, node: NodeId) {
        self.producers.insert(value, node);
    }

    pub(crate) fn clear_producer(&mut self, value: ValueId) {
        self.producers.remove(&value);
    }

    pub(crate) fn add_use(&mut self, value: ValueId, use_: Use) {
        self.users.entry(value).or_default().push(use_);
    }

    pub(crate) fn remove_use(&mut self, value: ValueId, use_: Use) {
        if let Some(list) = self.users.get_mut(&value) {
            list.retain(|existing| *existing != use_);
            if list.is_empty() {
                self.users.remove(&value);
            }
        }
    }

    /// Moves a single use from `from` to `to`.
    pub(crate) fn update_use(&mut self, use_: Use, from: ValueId, to: ValueId) {
        self.remove_use(from, use_);
        self.add_use(to, use_);
    }

    /// Drops every record mentioning `value`.
    pub(crate) fn forget_value(&mut self, value: ValueId) {
        self.producers.remove(&value);
        self.users.remove(&value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_last_use_drops_the_entry() {
        let mut index = UseIndex::default();
        let value = ValueId(3);
        let first = Use {
            node: NodeId(1),
            position: 0,
        };
        let second = Use {
            node: NodeId(2),
            position: 1,
        };
        index.add_use(value, first);
        index.add_use(value, second);
        index.remove_use(value, first);
        assert_eq!(index.users_of(value), &[second]);

        index.update_use(second, value, ValueId(4));
        assert!(index.users_of(value).is_empty());
        assert_eq!(index.users_of(ValueId(4)), &[second]);
    }
}
