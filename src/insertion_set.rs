use crate::{
    procedure::{BlockId, Procedure},
    value::ValueId,
};

/// Batches value insertions against one block. An insertion at index `i`
/// lands just before the value currently at `i`; same-index insertions keep
/// their submission order, so a dependency inserted first stays ahead of its
/// user.
pub struct InsertionSet {
    insertions: Vec<(usize, ValueId)>,
}

impl InsertionSet {
    pub fn new() -> Self {
        InsertionSet {
            insertions: Vec::new(),
        }
    }

    pub fn insert_value(&mut self, index: usize, value: ValueId) -> ValueId {
        self.insertions.push((index, value));
        value
    }

    pub fn execute(&mut self, proc: &mut Procedure, block: BlockId) {
        if self.insertions.is_empty() {
            return;
        }

        self.insertions.sort_by_key(|&(index, _)| index);

        let old_values = std::mem::take(&mut proc.block_mut(block).values);
        let mut new_values = Vec::with_capacity(old_values.len() + self.insertions.len());
        let mut pending = self.insertions.drain(..).peekable();

        for (index, value) in old_values.into_iter().enumerate() {
            while pending.peek().map_or(false, |&(at, _)| at <= index) {
                new_values.push(pending.next().unwrap().1);
            }
            new_values.push(value);
        }
        for (_, value) in pending {
            new_values.push(value);
        }

        proc.block_mut(block).values = new_values;
    }
}

impl Default for InsertionSet {
    fn default() -> Self {
        Self::new()
    }
}
