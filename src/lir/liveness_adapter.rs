use tinyvec::TinyVec;

use crate::liveness::{Liveness, LivenessAdapter};

use super::{basic_block::BasicBlockId, code::Code, tmp::Tmp};

type ActionsList = TinyVec<[usize; 4]>;

#[derive(Clone, Debug, Default)]
pub struct Actions {
    pub defs: ActionsList,
    pub uses: ActionsList,
}

/// Liveness adapter over every Tmp of both banks at once, using the linear
/// index space. The coupled first allocation round shares one liveness
/// computation between the two banks; the per-bank interference builders
/// filter by bank as they read the live sets.
pub struct UnifiedTmpLivenessAdapter<'a> {
    pub code: &'a Code,
    actions: Vec<Vec<Actions>>,
}

impl<'a> UnifiedTmpLivenessAdapter<'a> {
    pub fn new(code: &'a Code) -> Self {
        Self {
            actions: vec![Vec::new(); code.blocks.len()],
            code,
        }
    }

    fn actions_at(&self, block: BasicBlockId, boundary: usize) -> &Actions {
        &self.actions[block.0][boundary]
    }
}

impl<'a> LivenessAdapter for UnifiedTmpLivenessAdapter<'a> {
    type Thing = Tmp;
    type CFG = Code;

    fn cfg(&self) -> &Self::CFG {
        self.code
    }

    fn num_indices(&self) -> usize {
        Tmp::linear_index_end(self.code)
    }

    fn value_to_index(&self, thing: Tmp) -> usize {
        thing.linear_index(self.code)
    }

    fn index_to_value(&self, index: usize) -> Tmp {
        Tmp::tmp_for_linear_index(self.code, index)
    }

    fn block_size(&self, block: BasicBlockId) -> usize {
        self.code.block(block).insts.len()
    }

    fn for_each_use(&self, block: BasicBlockId, boundary: usize, mut func: impl FnMut(usize)) {
        for &index in self.actions_at(block, boundary).uses.iter() {
            func(index);
        }
    }

    fn for_each_def(&self, block: BasicBlockId, boundary: usize, mut func: impl FnMut(usize)) {
        for &index in self.actions_at(block, boundary).defs.iter() {
            func(index);
        }
    }

    fn prepare_to_compute(&mut self) {
        for block_index in 0..self.code.blocks.len() {
            let block = BasicBlockId(block_index);
            let block_len = self.code.block(block).insts.len();

            let mut actions_for_boundary = vec![Actions::default(); block_len + 1];

            // Uses act at the boundary before the instruction; defs land at
            // the boundary after it.
            for inst_index in (0..block_len).rev() {
                let inst = &self.code.block(block).insts[inst_index];
                let code = self.code;
                inst.for_each_tmp(|tmp, role, _bank| {
                    let index = tmp.linear_index(code);

                    if role.is_any_use() {
                        let uses = &mut actions_for_boundary[inst_index].uses;
                        if !uses.contains(&index) {
                            uses.push(index);
                        }
                    }

                    if role.is_any_def() {
                        let defs = &mut actions_for_boundary[inst_index + 1].defs;
                        if !defs.contains(&index) {
                            defs.push(index);
                        }
                    }
                });
            }

            self.actions[block_index] = actions_for_boundary;
        }
    }
}

pub type UnifiedTmpLiveness<'a, 'b> = Liveness<'a, UnifiedTmpLivenessAdapter<'b>>;
