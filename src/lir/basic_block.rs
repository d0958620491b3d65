use std::ops::{Deref, DerefMut};

use tinyvec::TinyVec;

use super::{code::Code, inst::Inst};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub usize);

impl Default for BasicBlockId {
    fn default() -> Self {
        BasicBlockId(usize::MAX)
    }
}

pub struct BasicBlock {
    pub index: usize,
    pub insts: Vec<Inst>,
    pub successors: TinyVec<[BasicBlockId; 2]>,
    pub predecessors: TinyVec<[BasicBlockId; 2]>,
}

impl Deref for BasicBlock {
    type Target = Vec<Inst>;

    fn deref(&self) -> &Self::Target {
        &self.insts
    }
}

impl DerefMut for BasicBlock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.insts
    }
}

pub fn update_predecessors_after(root: BasicBlockId, code: &mut Code) {
    let mut worklist = TinyVec::<[BasicBlockId; 16]>::new();
    worklist.push(root);

    while let Some(block) = worklist.pop() {
        for i in 0..code.block(block).successors.len() {
            let successor = code.block(block).successors[i];
            if !code.block(successor).predecessors.contains(&block) {
                code.block_mut(successor).predecessors.push(block);
                worklist.push(successor);
            }
        }
    }
}
