use std::borrow::Cow;

use tinyvec::TinyVec;

use crate::{
    bank::Bank,
    jit::reg::{self, Reg},
    liveness::Graph,
};

use super::{
    basic_block::{update_predecessors_after, BasicBlock, BasicBlockId},
    stack_slot::{StackSlot, StackSlotId, StackSlotKind},
    tmp::Tmp,
};

/// The low-level program the register allocator runs on: a CFG of
/// instructions over temporaries, plus the target's allocatable register
/// lists and the stack slots minted for spills.
pub struct Code {
    pub gp_regs_in_priority_order: Vec<Reg>,
    pub fp_regs_in_priority_order: Vec<Reg>,
    pub num_gp_tmps: usize,
    pub num_fp_tmps: usize,
    pub blocks: Vec<BasicBlock>,
    pub stack_slots: Vec<StackSlot>,
}

impl Code {
    pub fn new() -> Self {
        Code {
            gp_regs_in_priority_order: reg::regs_in_priority_order(Bank::GP).to_vec(),
            fp_regs_in_priority_order: reg::regs_in_priority_order(Bank::FP).to_vec(),
            num_gp_tmps: 0,
            num_fp_tmps: 0,
            blocks: Vec::new(),
            stack_slots: Vec::new(),
        }
    }

    pub fn regs_in_priority_order(&self, bank: Bank) -> &[Reg] {
        match bank {
            Bank::GP => &self.gp_regs_in_priority_order,
            Bank::FP => &self.fp_regs_in_priority_order,
        }
    }

    /// Overrides the allocatable registers of a bank. The order is the
    /// allocation priority; the length is K for that bank.
    pub fn set_regs_in_priority_order(&mut self, bank: Bank, regs: &[Reg]) {
        match bank {
            Bank::GP => self.gp_regs_in_priority_order = regs.to_vec(),
            Bank::FP => self.fp_regs_in_priority_order = regs.to_vec(),
        }
    }

    pub fn num_tmps(&self, bank: Bank) -> usize {
        match bank {
            Bank::GP => self.num_gp_tmps,
            Bank::FP => self.num_fp_tmps,
        }
    }

    pub fn new_tmp(&mut self, bank: Bank) -> Tmp {
        match bank {
            Bank::GP => {
                self.num_gp_tmps += 1;
                Tmp::gp_tmp_for_index(self.num_gp_tmps - 1)
            }
            Bank::FP => {
                self.num_fp_tmps += 1;
                Tmp::fp_tmp_for_index(self.num_fp_tmps - 1)
            }
        }
    }

    pub fn block(&self, id: BasicBlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BasicBlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn add_block(&mut self) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            index: id.0,
            insts: Vec::new(),
            successors: TinyVec::new(),
            predecessors: TinyVec::new(),
        });
        id
    }

    pub fn add_stack_slot(&mut self, byte_size: usize, kind: StackSlotKind) -> StackSlotId {
        let id = StackSlotId(self.stack_slots.len());
        self.stack_slots.push(StackSlot {
            byte_size: byte_size as u32,
            kind,
            index: id.0,
        });
        id
    }

    pub fn stack_slot(&self, id: StackSlotId) -> &StackSlot {
        &self.stack_slots[id.0]
    }

    pub fn stack_slot_mut(&mut self, id: StackSlotId) -> &mut StackSlot {
        &mut self.stack_slots[id.0]
    }

    pub fn clear_predecessors(&mut self) {
        for block in self.blocks.iter_mut() {
            block.predecessors.clear();
        }
    }

    pub fn reset_reachability(&mut self) {
        self.clear_predecessors();
        if !self.blocks.is_empty() {
            update_predecessors_after(BasicBlockId(0), self);
        }
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in self.blocks.iter() {
            writeln!(f, "BB{}:", block.index)?;
            for inst in block.insts.iter() {
                writeln!(f, "    {}", inst)?;
            }
            if !block.successors.is_empty() {
                write!(f, "  Successors:")?;
                for successor in block.successors.iter() {
                    write!(f, " BB{}", successor.0)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl Graph for Code {
    type Node = BasicBlockId;

    fn num_nodes(&self) -> usize {
        self.blocks.len()
    }

    fn node(&self, index: usize) -> Option<Self::Node> {
        if index < self.blocks.len() {
            Some(BasicBlockId(index))
        } else {
            None
        }
    }

    fn node_index(&self, node: Self::Node) -> usize {
        node.0
    }

    fn successors(&self, node: Self::Node) -> Cow<'_, [Self::Node]> {
        Cow::Borrowed(&self.block(node).successors)
    }

    fn predecessors(&self, node: Self::Node) -> Cow<'_, [Self::Node]> {
        Cow::Borrowed(&self.block(node).predecessors)
    }
}
