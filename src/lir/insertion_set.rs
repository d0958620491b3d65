use super::{basic_block::BasicBlockId, code::Code, inst::Inst};

pub struct Insertion {
    index: usize,
    inst: Inst,
}

/// Batches instruction insertions against one block and splices them in with
/// a single pass. An insertion at index `i` lands just before the instruction
/// currently at `i`; insertions at the same index keep their submission
/// order.
pub struct InsertionSet {
    insertions: Vec<Insertion>,
}

impl InsertionSet {
    pub fn new() -> Self {
        InsertionSet {
            insertions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    pub fn insert_inst(&mut self, index: usize, inst: Inst) {
        self.insertions.push(Insertion { index, inst });
    }

    pub fn insert_insts(&mut self, index: usize, insts: impl IntoIterator<Item = Inst>) {
        for inst in insts {
            self.insert_inst(index, inst);
        }
    }

    pub fn execute(&mut self, code: &mut Code, block: BasicBlockId) {
        if self.insertions.is_empty() {
            return;
        }

        // Stable, so same-index insertions stay in submission order.
        self.insertions.sort_by_key(|insertion| insertion.index);

        let old_insts = std::mem::take(&mut code.block_mut(block).insts);
        let mut new_insts = Vec::with_capacity(old_insts.len() + self.insertions.len());
        let mut pending = self.insertions.drain(..).peekable();

        for (index, inst) in old_insts.into_iter().enumerate() {
            while pending
                .peek()
                .map_or(false, |insertion| insertion.index <= index)
            {
                new_insts.push(pending.next().unwrap().inst);
            }
            new_insts.push(inst);
        }
        for insertion in pending {
            new_insts.push(insertion.inst);
        }

        code.block_mut(block).insts = new_insts;
    }
}

impl Default for InsertionSet {
    fn default() -> Self {
        Self::new()
    }
}
