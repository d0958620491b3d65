//! Iterated register coalescing, in the Chaitin/Briggs/George-Appel style.
//!
//! The allocator colors one bank at a time. Per round it builds an
//! interference graph from a backward liveness walk, then repeatedly
//! simplifies low-degree vertices, conservatively coalesces moves, freezes
//! move-related vertices that can do neither, and picks spill candidates,
//! until every vertex is on the select stack or coalesced away. Coloring pops
//! the stack and assigns the first register not taken by a neighbor. If
//! anything fails to color, the spilled temporaries are lowered to stack
//! slots with short-lived fills and spills around each access, and the whole
//! round restarts on the rewritten program.

use std::{collections::HashMap, marker::PhantomData};

use indexmap::IndexSet;
use log::{debug, trace};
use thiserror::Error;
use tinyvec::TinyVec;

use crate::{
    bank::Bank,
    jit::{reg::Reg, register_set::RegisterSet},
    liveness::{Liveness, LocalCalc},
    utils::{
        bitvector::BitVector,
        interference_graph::{Interference, InterferenceGraph},
        phase_scope::phase_scope,
    },
    width::{bytes_for_width, Width},
};

use super::{
    arg::{Arg, ArgRole},
    basic_block::BasicBlockId,
    code::Code,
    insertion_set::InsertionSet,
    inst::Inst,
    liveness_adapter::UnifiedTmpLivenessAdapter,
    opcode::Opcode,
    stack_slot::{StackSlotId, StackSlotKind},
    tmp::{AbsoluteIndexing, FpIndexing, GpIndexing, Tmp},
};

#[derive(Debug, Error)]
pub enum RegAllocError {
    #[error("register allocation for bank {bank} did not converge after {iterations} rounds")]
    DidNotConverge { bank: Bank, iterations: usize },
}

/// Each spill round strictly shortens the live ranges that failed to color,
/// so the fixed point arrives quickly in practice. The cap turns a broken
/// upstream program into a diagnosable failure instead of an endless loop.
const MAX_OUTER_ITERATIONS: usize = 50;

/// Instead of keeping move instructions around, we keep their operands'
/// absolute indices and use the position in the candidate vector as the
/// move's identifier.
#[derive(Clone, Copy)]
struct MoveOperands {
    src_index: u32,
    dst_index: u32,
}

/// The worklist of moves eligible for coalescing. Index-addressed so a move
/// can be taken out of the middle or returned in O(1), while take_last pops
/// in deterministic order.
struct OrderedMoveSet {
    position_in_move_list: Vec<usize>,
    move_list: Vec<usize>,
}

impl OrderedMoveSet {
    fn new() -> Self {
        OrderedMoveSet {
            position_in_move_list: Vec::new(),
            move_list: Vec::new(),
        }
    }

    fn add_move(&mut self) -> usize {
        let index = self.position_in_move_list.len();
        self.position_in_move_list.push(self.move_list.len());
        self.move_list.push(index);
        index
    }

    fn is_empty(&self) -> bool {
        self.move_list.is_empty()
    }

    fn contains(&self, move_index: usize) -> bool {
        self.position_in_move_list[move_index] != usize::MAX
    }

    fn take_move(&mut self, move_index: usize) {
        let position = self.position_in_move_list[move_index];
        if position == usize::MAX {
            return;
        }
        debug_assert_eq!(self.move_list[position], move_index);

        let last = *self.move_list.last().unwrap();
        self.position_in_move_list[last] = position;
        self.move_list[position] = last;
        self.move_list.pop();
        self.position_in_move_list[move_index] = usize::MAX;

        debug_assert!(!self.contains(move_index));
    }

    fn take_last_move(&mut self) -> usize {
        let last = self.move_list.pop().unwrap();
        self.position_in_move_list[last] = usize::MAX;
        last
    }

    /// Only moves that previously failed the conservative heuristics may
    /// come back.
    fn return_move(&mut self, move_index: usize) {
        debug_assert!(!self.contains(move_index));
        self.position_in_move_list[move_index] = self.move_list.len();
        self.move_list.push(move_index);
    }
}

/// One bank's allocator state. `B` is the bank's dense indexing; the two
/// banks are separate monomorphizations and share nothing at runtime.
struct ColoringAllocator<B: AbsoluteIndexing> {
    regs_in_priority_order: Vec<Reg>,
    last_precolored_register_index: u32,

    interference_edges: Interference,
    adjacency_list: Vec<TinyVec<[u32; 4]>>,
    degrees: Vec<u32>,

    coalescing_candidates: Vec<MoveOperands>,
    /// For each vertex, the indices of the candidate moves it appears in.
    move_list: Vec<IndexSet<usize>>,

    colored_tmps: Vec<Reg>,
    spilled_tmps: Vec<u32>,
    coalesced_tmps: Vec<u32>,

    is_on_select_stack: BitVector,
    select_stack: Vec<u32>,

    simplify_worklist: Vec<u32>,
    freeze_worklist: IndexSet<u32>,
    spill_worklist: IndexSet<u32>,
    worklist_moves: OrderedMoveSet,
    active_moves: BitVector,

    bank: PhantomData<B>,
}

impl<B: AbsoluteIndexing> ColoringAllocator<B> {
    fn new(code: &Code) -> Self {
        let tmp_array_size = B::absolute_index_for_tmp_index(code.num_tmps(B::BANK));
        let last_precolored_register_index = B::last_machine_register_index() as u32;

        let mut this = ColoringAllocator {
            regs_in_priority_order: code.regs_in_priority_order(B::BANK).to_vec(),
            last_precolored_register_index,
            interference_edges: Interference::for_max_index(tmp_array_size),
            adjacency_list: vec![TinyVec::new(); tmp_array_size],
            degrees: vec![0; tmp_array_size],
            coalescing_candidates: Vec::new(),
            move_list: vec![IndexSet::new(); tmp_array_size],
            colored_tmps: vec![Reg::default(); tmp_array_size],
            spilled_tmps: Vec::new(),
            coalesced_tmps: vec![0; tmp_array_size],
            is_on_select_stack: BitVector::with_capacity(tmp_array_size),
            select_stack: Vec::new(),
            simplify_worklist: Vec::new(),
            freeze_worklist: IndexSet::new(),
            spill_worklist: IndexSet::new(),
            worklist_moves: OrderedMoveSet::new(),
            active_moves: BitVector::new(),
            bank: PhantomData,
        };

        // Precolored registers have infinite degree and already hold their
        // color. Index zero is the empty Tmp and stays unused.
        for i in 0..=this.last_precolored_register_index {
            this.degrees[i as usize] = u32::MAX;
        }
        for i in 1..=this.last_precolored_register_index {
            let tmp = B::tmp_for_absolute_index(i as usize);
            debug_assert!(tmp.is_reg());
            this.colored_tmps[i as usize] = tmp.reg();
        }

        this
    }

    fn tmp(index: u32) -> Tmp {
        B::tmp_for_absolute_index(index as usize)
    }

    fn register_count(&self) -> usize {
        self.regs_in_priority_order.len()
    }

    fn is_precolored(&self, tmp_index: u32) -> bool {
        tmp_index <= self.last_precolored_register_index
    }

    fn get_alias(&self, tmp_index: u32) -> u32 {
        let mut alias = tmp_index;
        while self.coalesced_tmps[alias as usize] != 0 {
            alias = self.coalesced_tmps[alias as usize];
        }
        alias
    }

    fn get_alias_tmp(&self, tmp: Tmp) -> Tmp {
        Self::tmp(self.get_alias(B::absolute_index(tmp) as u32))
    }

    fn has_been_simplified(&self, tmp_index: u32) -> bool {
        self.is_on_select_stack.quick_get(tmp_index as usize)
            || self.coalesced_tmps[tmp_index as usize] != 0
    }

    fn requires_spilling(&self) -> bool {
        !self.spilled_tmps.is_empty()
    }

    fn spilled_tmps(&self) -> &[u32] {
        &self.spilled_tmps
    }

    fn allocated_reg(&self, tmp: Tmp) -> Reg {
        debug_assert!(!tmp.is_reg());
        let reg = self.colored_tmps[B::absolute_index(tmp)];
        if reg == Reg::default() {
            // Only Tmps that interfere got an explicit color. A Tmp that
            // never interferes with anything can take any register.
            self.regs_in_priority_order[0]
        } else {
            reg
        }
    }

    /// Records the interference produced by one instruction, given the set of
    /// temporaries live just after it.
    fn build(&mut self, inst: &Inst, local_calc: &LocalCalc<'_, '_, UnifiedTmpLivenessAdapter>) {
        // All the Defs of one instruction interfere with each other.
        let mut defs: TinyVec<[Tmp; 2]> = TinyVec::new();
        inst.for_each_tmp(|tmp, role, bank| {
            if bank == B::BANK && role.is_any_def() {
                defs.push(tmp);
            }
        });
        for i in 0..defs.len() {
            for j in i + 1..defs.len() {
                self.add_edge(defs[i], defs[j]);
            }
        }

        if may_be_coalescable::<B>(inst) {
            let use_tmp = inst.args[0].tmp();
            let def_tmp = inst.args[1].tmp();

            let move_index = self.coalescing_candidates.len();
            self.coalescing_candidates.push(MoveOperands {
                src_index: B::absolute_index(use_tmp) as u32,
                dst_index: B::absolute_index(def_tmp) as u32,
            });
            let index_in_worklist = self.worklist_moves.add_move();
            debug_assert_eq!(index_in_worklist, move_index);

            for arg in inst.args.iter() {
                self.move_list[B::absolute_index(arg.tmp())].insert(move_index);
            }

            // The Use of this move must not interfere with its Def, even if
            // it is live after the move. With that edge present the move
            // could never be coalesced, even when the two Tmps never
            // interfere anywhere else.
            for live_tmp in local_calc.live().iter() {
                if live_tmp.bank() == B::BANK && live_tmp != use_tmp {
                    self.add_edge(def_tmp, live_tmp);
                }
            }
        } else {
            let mut edges: TinyVec<[(Tmp, Tmp); 8]> = TinyVec::new();
            inst.for_each_tmp(|tmp, role, bank| {
                if bank != B::BANK || !role.is_any_def() {
                    return;
                }
                for live_tmp in local_calc.live().iter() {
                    if live_tmp.bank() == B::BANK {
                        edges.push((tmp, live_tmp));
                    }
                }
            });
            for (a, b) in edges {
                self.add_edge(a, b);
            }
        }
    }

    fn add_edge(&mut self, a: Tmp, b: Tmp) {
        if a == b {
            return;
        }
        self.add_edge_by_index(B::absolute_index(a) as u32, B::absolute_index(b) as u32);
    }

    fn add_edge_by_index(&mut self, a: u32, b: u32) {
        debug_assert!(a != b, "a Tmp can never interfere with itself");

        if self.interference_edges.add_and_return_is_new_entry(a, b) {
            if !self.is_precolored(a) {
                debug_assert!(!self.adjacency_list[a as usize].contains(&b));
                self.adjacency_list[a as usize].push(b);
                self.degrees[a as usize] += 1;
            }
            if !self.is_precolored(b) {
                debug_assert!(!self.adjacency_list[b as usize].contains(&a));
                self.adjacency_list[b as usize].push(a);
                self.degrees[b as usize] += 1;
            }
        }
    }

    fn allocate(&mut self) {
        self.active_moves.ensure_size(self.coalescing_candidates.len());
        self.make_worklist();

        loop {
            if !self.simplify_worklist.is_empty() {
                self.simplify();
            } else if !self.worklist_moves.is_empty() {
                self.coalesce();
            } else if !self.freeze_worklist.is_empty() {
                self.freeze();
            } else if !self.spill_worklist.is_empty() {
                self.select_spill();
            }

            if self.simplify_worklist.is_empty()
                && self.worklist_moves.is_empty()
                && self.freeze_worklist.is_empty()
                && self.spill_worklist.is_empty()
            {
                break;
            }
        }

        self.assign_colors();
    }

    fn make_worklist(&mut self) {
        let first_non_reg_index = self.last_precolored_register_index + 1;
        for i in first_non_reg_index as usize..self.degrees.len() {
            let degree = self.degrees[i];
            if degree == 0 {
                continue;
            }
            if degree >= self.register_count() as u32 {
                self.spill_worklist.insert(i as u32);
            } else if !self.move_list[i].is_empty() {
                self.freeze_worklist.insert(i as u32);
            } else {
                self.simplify_worklist.push(i as u32);
            }
        }
    }

    fn for_each_adjacent(&mut self, tmp_index: u32, mut function: impl FnMut(&mut Self, u32)) {
        for i in 0..self.adjacency_list[tmp_index as usize].len() {
            let adjacent = self.adjacency_list[tmp_index as usize][i];
            if !self.has_been_simplified(adjacent) {
                function(self, adjacent);
            }
        }
    }

    /// A low-degree vertex can always be colored, so take it out of the graph
    /// and remember to color it last.
    fn simplify(&mut self) {
        let last_index = self.simplify_worklist.pop().unwrap();

        debug_assert!(!self.is_on_select_stack.quick_get(last_index as usize));
        debug_assert!(!self.select_stack.contains(&last_index));
        self.select_stack.push(last_index);
        self.is_on_select_stack.quick_set(last_index as usize, true);

        self.for_each_adjacent(last_index, |this, adjacent| {
            this.decrement_degree(adjacent);
        });
    }

    fn decrement_degree(&mut self, tmp_index: u32) {
        debug_assert!(self.degrees[tmp_index as usize] != 0);

        let old_degree = self.degrees[tmp_index as usize];
        self.degrees[tmp_index as usize] = old_degree - 1;

        if old_degree == self.register_count() as u32 {
            self.enable_moves_on_value_and_adjacents(tmp_index);
            self.spill_worklist.swap_remove(&tmp_index);
            if self.is_move_related(tmp_index) {
                self.freeze_worklist.insert(tmp_index);
            } else {
                self.simplify_worklist.push(tmp_index);
            }
        }
    }

    fn is_move_related(&self, tmp_index: u32) -> bool {
        self.move_list[tmp_index as usize]
            .iter()
            .any(|&move_index| {
                self.active_moves.quick_get(move_index) || self.worklist_moves.contains(move_index)
            })
    }

    fn enable_moves_on_value(&mut self, tmp_index: u32) {
        for i in 0..self.move_list[tmp_index as usize].len() {
            let move_index = *self.move_list[tmp_index as usize].get_index(i).unwrap();
            if self.active_moves.quick_clear(move_index) {
                self.worklist_moves.return_move(move_index);
            }
        }
    }

    fn enable_moves_on_value_and_adjacents(&mut self, tmp_index: u32) {
        self.enable_moves_on_value(tmp_index);
        self.for_each_adjacent(tmp_index, |this, adjacent| {
            this.enable_moves_on_value(adjacent);
        });
    }

    fn coalesce(&mut self) {
        let move_index = self.worklist_moves.take_last_move();
        let move_operands = self.coalescing_candidates[move_index];

        let mut u = self.get_alias(move_operands.src_index);
        let mut v = self.get_alias(move_operands.dst_index);
        if self.is_precolored(v) {
            std::mem::swap(&mut u, &mut v);
        }

        trace!(
            "coalescing move {}: u = {}, v = {}",
            move_index,
            Self::tmp(u),
            Self::tmp(v)
        );

        if u == v {
            self.add_work_list(u);
            trace!("    coalesced");
        } else if self.is_precolored(v) || self.interference_edges.contains(u, v) {
            // No coalescing can remove the interference; never consider this
            // move again.
            self.add_work_list(u);
            self.add_work_list(v);
            trace!("    constrained");
        } else if self.can_be_safely_coalesced(u, v) {
            self.combine(u, v);
            self.add_work_list(u);
            trace!("    safely coalesced");
        } else {
            self.active_moves.quick_set(move_index, true);
            trace!("    not yet safe, keeping the move active");
        }
    }

    fn can_be_safely_coalesced(&self, u: u32, v: u32) -> bool {
        debug_assert!(!self.is_precolored(v));
        if self.is_precolored(u) {
            return self.precolored_coalescing_heuristic(u, v);
        }
        self.conservative_heuristic(u, v)
    }

    /// Briggs: combining is safe when the merged vertex has fewer than K
    /// neighbors of degree >= K. If the graph was colorable before, it still
    /// is after.
    fn conservative_heuristic(&self, u: u32, v: u32) -> bool {
        debug_assert!(u != v);
        debug_assert!(!self.is_precolored(u));
        debug_assert!(!self.is_precolored(v));

        let adjacents_of_u = &self.adjacency_list[u as usize];
        let adjacents_of_v = &self.adjacency_list[v as usize];

        if adjacents_of_u.len() + adjacents_of_v.len() < self.register_count() {
            // Shortcut: fewer neighbors than registers in total.
            return true;
        }

        let mut high_order_adjacents: TinyVec<[u32; 16]> = TinyVec::new();
        for &adjacent in adjacents_of_u.iter().chain(adjacents_of_v.iter()) {
            if !self.has_been_simplified(adjacent)
                && self.degrees[adjacent as usize] >= self.register_count() as u32
                && !high_order_adjacents.contains(&adjacent)
            {
                high_order_adjacents.push(adjacent);
                if high_order_adjacents.len() >= self.register_count() {
                    return false;
                }
            }
        }
        true
    }

    /// George: a precolored/allocatable pair may coalesce when every neighbor
    /// of the allocatable side already interferes with the precolored side,
    /// is itself precolored, has low degree, or is already stacked. A
    /// high-degree neighbor that fails all of those might need the precolored
    /// register, and coalescing could make the graph uncolorable.
    fn precolored_coalescing_heuristic(&self, u: u32, v: u32) -> bool {
        debug_assert!(self.is_precolored(u));
        debug_assert!(!self.is_precolored(v));

        for &adjacent in self.adjacency_list[v as usize].iter() {
            if !self.is_precolored(adjacent)
                && !self.has_been_simplified(adjacent)
                && self.degrees[adjacent as usize] >= self.register_count() as u32
                && !self.interference_edges.contains(u, adjacent)
            {
                return false;
            }
        }
        true
    }

    fn add_work_list(&mut self, tmp_index: u32) {
        if !self.is_precolored(tmp_index)
            && self.degrees[tmp_index as usize] < self.register_count() as u32
            && !self.is_move_related(tmp_index)
        {
            self.freeze_worklist.swap_remove(&tmp_index);
            self.simplify_worklist.push(tmp_index);
        }
    }

    fn combine(&mut self, u: u32, v: u32) {
        if !self.freeze_worklist.swap_remove(&v) {
            self.spill_worklist.swap_remove(&v);
        }

        debug_assert!(self.coalesced_tmps[v as usize] == 0);
        self.coalesced_tmps[v as usize] = u;

        let v_moves = std::mem::take(&mut self.move_list[v as usize]);
        for move_index in v_moves {
            self.move_list[u as usize].insert(move_index);
        }

        self.for_each_adjacent(v, |this, adjacent| {
            this.add_edge_by_index(adjacent, u);
            this.decrement_degree(adjacent);
        });

        if self.degrees[u as usize] >= self.register_count() as u32
            && self.freeze_worklist.swap_remove(&u)
        {
            self.spill_worklist.insert(u);
        }
    }

    /// Gives up on coalescing the moves of one freeze candidate so it becomes
    /// an ordinary low-degree vertex.
    fn freeze(&mut self) {
        let victim = self.freeze_worklist.pop().unwrap();
        debug_assert!(
            self.get_alias(victim) == victim,
            "coalesce() must not leave aliased tmps in the freeze worklist"
        );
        self.simplify_worklist.push(victim);
        self.freeze_moves(victim);
    }

    fn freeze_moves(&mut self, tmp_index: u32) {
        for i in 0..self.move_list[tmp_index as usize].len() {
            let move_index = *self.move_list[tmp_index as usize].get_index(i).unwrap();

            let is_live = self.active_moves.quick_get(move_index)
                || self.worklist_moves.contains(move_index);
            if !is_live {
                continue;
            }

            if !self.active_moves.quick_clear(move_index) {
                self.worklist_moves.take_move(move_index);
            }

            let move_operands = self.coalescing_candidates[move_index];
            let original_other = if move_operands.src_index != tmp_index {
                move_operands.src_index
            } else {
                move_operands.dst_index
            };
            let other = self.get_alias(original_other);

            if !self.is_precolored(other)
                && self.degrees[other as usize] < self.register_count() as u32
                && !self.is_move_related(other)
                && self.freeze_worklist.swap_remove(&other)
            {
                self.simplify_worklist.push(other);
            }
        }
    }

    fn select_spill(&mut self) {
        debug_assert!(!self.spill_worklist.is_empty());

        // Highest current degree wins; ties go to the earliest entry in
        // worklist order, so the choice is reproducible.
        let mut victim = None;
        let mut max_degree = 0u32;
        for &tmp_index in self.spill_worklist.iter() {
            let degree = self.degrees[tmp_index as usize];
            if victim.is_none() || degree > max_degree {
                victim = Some(tmp_index);
                max_degree = degree;
            }
        }
        let victim = victim.unwrap();

        trace!(
            "selecting spill candidate {} with degree {}",
            Self::tmp(victim),
            max_degree
        );

        self.spill_worklist.swap_remove(&victim);
        self.simplify_worklist.push(victim);
        self.freeze_moves(victim);
    }

    fn assign_colors(&mut self) {
        debug_assert!(self.simplify_worklist.is_empty());
        debug_assert!(self.worklist_moves.is_empty());
        debug_assert!(self.freeze_worklist.is_empty());
        debug_assert!(self.spill_worklist.is_empty());

        // Reclaim what coloring no longer reads. The adjacency lists and the
        // alias map stay: they drive the forbidden-color computation.
        self.interference_edges.clear();
        self.degrees = Vec::new();
        self.move_list = Vec::new();

        while let Some(tmp_index) = self.select_stack.pop() {
            debug_assert!(!self.is_precolored(tmp_index));
            debug_assert!(self.colored_tmps[tmp_index as usize] == Reg::default());
            debug_assert!(self.get_alias(tmp_index) == tmp_index);

            let mut colored_registers = RegisterSet::new();
            for &adjacent in self.adjacency_list[tmp_index as usize].iter() {
                let alias = self.get_alias(adjacent);
                let reg = self.colored_tmps[alias as usize];
                if reg != Reg::default() {
                    colored_registers.add(reg);
                }
            }

            let mut color_assigned = false;
            for reg in self.regs_in_priority_order.iter().copied() {
                if !colored_registers.contains(reg) {
                    self.colored_tmps[tmp_index as usize] = reg;
                    color_assigned = true;
                    break;
                }
            }

            if !color_assigned {
                self.spilled_tmps.push(tmp_index);
            }
        }

        if !self.spilled_tmps.is_empty() {
            // The allocation was futile; the outer loop reruns after spill
            // insertion.
            self.colored_tmps.clear();
        }
    }
}

fn may_be_coalescable<B: AbsoluteIndexing>(inst: &Inst) -> bool {
    if inst.opcode != Opcode::move_for_bank(B::BANK) {
        return false;
    }
    debug_assert_eq!(inst.args.len(), 2);
    inst.args[0].is_tmp() && inst.args[1].is_tmp()
}

fn is_useless_move<B: AbsoluteIndexing>(inst: &Inst) -> bool {
    may_be_coalescable::<B>(inst) && inst.args[0].tmp() == inst.args[1].tmp()
}

fn build_interference<B: AbsoluteIndexing>(
    allocator: &mut ColoringAllocator<B>,
    code: &Code,
    liveness: &mut Liveness<UnifiedTmpLivenessAdapter>,
) {
    for block_index in 0..code.blocks.len() {
        let block = BasicBlockId(block_index);
        let mut local_calc = LocalCalc::new(liveness, block);
        for inst_index in (0..code.block(block).insts.len()).rev() {
            let inst = &code.block(block).insts[inst_index];
            allocator.build(inst, &local_calc);
            local_calc.execute(inst_index);
        }
    }
}

/// Substitutes every allocatable temporary of the bank by its assigned
/// register, then drops the moves that became no-ops.
fn assign_registers_to_program<B: AbsoluteIndexing>(
    code: &mut Code,
    allocator: &ColoringAllocator<B>,
) {
    for block_index in 0..code.blocks.len() {
        let block = BasicBlockId(block_index);
        for inst_index in 0..code.block(block).insts.len() {
            let inst = &mut code.block_mut(block).insts[inst_index];
            inst.for_each_tmp_fast_mut(|tmp| {
                if tmp.is_reg() || tmp.bank() != B::BANK {
                    return;
                }
                let alias = allocator.get_alias_tmp(*tmp);
                *tmp = if alias.is_reg() {
                    alias
                } else {
                    Tmp::from_reg(allocator.allocated_reg(alias))
                };
            });
        }
        code.block_mut(block)
            .insts
            .retain(|inst| !is_useless_move::<B>(inst));
    }
}

/// Lowers every spilled temporary to a stack slot. Accesses whose slot admits
/// a memory operand are rewritten in place; everything else goes through a
/// fresh temporary that is filled just before and/or spilled just after the
/// instruction, so each spill round leaves only instruction-local live
/// ranges behind.
fn add_spill_and_fill<B: AbsoluteIndexing>(code: &mut Code, spilled_tmps: &[u32]) {
    let mut stack_slots: HashMap<Tmp, StackSlotId> = HashMap::new();
    for &tmp_index in spilled_tmps {
        let tmp = B::tmp_for_absolute_index(tmp_index as usize);
        let slot = code.add_stack_slot(bytes_for_width(Width::W64), StackSlotKind::Spill);
        let is_new_tmp = stack_slots.insert(tmp, slot).is_none();
        debug_assert!(is_new_tmp);
    }

    let move_opcode = Opcode::move_for_bank(B::BANK);
    let mut insertion_set = InsertionSet::new();

    for block_index in 0..code.blocks.len() {
        let block = BasicBlockId(block_index);
        for inst_index in 0..code.block(block).insts.len() {
            let mut inst = code.block(block).insts[inst_index].clone();
            let opcode = inst.opcode;

            // Use the stack slot directly where the instruction admits a
            // memory operand and the role is a pure use or a pure def.
            inst.for_each_arg_mut(|arg_index, arg, role, bank| {
                if bank != B::BANK {
                    return;
                }
                let Arg::Tmp(tmp) = *arg else { return };
                if tmp.is_reg() {
                    return;
                }
                if let Some(&slot) = stack_slots.get(&tmp) {
                    if opcode.admits_stack(arg_index)
                        && matches!(role, ArgRole::Use | ArgRole::Def)
                    {
                        *arg = Arg::new_stack(slot, 0);
                    }
                }
            });

            // For every other access, fill and/or spill through a fresh
            // temporary. A UseDef keeps one temporary for both sides.
            inst.for_each_tmp_mut(|tmp, role, bank| {
                if tmp.is_reg() || bank != B::BANK {
                    return;
                }
                let Some(&slot) = stack_slots.get(tmp) else {
                    return;
                };

                let new_tmp = code.new_tmp(B::BANK);
                let slot_arg = Arg::new_stack(slot, 0);
                if role.is_any_use() {
                    insertion_set.insert_inst(
                        inst_index,
                        Inst::new(move_opcode, &[slot_arg, Arg::new_tmp(new_tmp)]),
                    );
                }
                if role.is_any_def() {
                    insertion_set.insert_inst(
                        inst_index + 1,
                        Inst::new(move_opcode, &[Arg::new_tmp(new_tmp), slot_arg]),
                    );
                }
                *tmp = new_tmp;
            });

            code.block_mut(block).insts[inst_index] = inst;
        }
        insertion_set.execute(code, block);
    }
}

/// One full round for one bank: fresh liveness, fresh interference, allocate.
/// On success the program is rewritten to registers and `true` comes back;
/// otherwise the spills are lowered and the caller restarts.
fn allocate_on_bank_once<B: AbsoluteIndexing>(code: &mut Code) -> bool {
    let allocator = {
        let mut allocator = ColoringAllocator::<B>::new(code);
        let mut adapter = UnifiedTmpLivenessAdapter::new(code);
        let mut liveness = Liveness::new(&mut adapter);
        liveness.compute();
        build_interference(&mut allocator, code, &mut liveness);
        allocator.allocate();
        allocator
    };

    if allocator.requires_spilling() {
        debug!(
            "{} bank: {} tmps spilled, restarting",
            B::BANK,
            allocator.spilled_tmps().len()
        );
        add_spill_and_fill::<B>(code, allocator.spilled_tmps());
        false
    } else {
        assign_registers_to_program::<B>(code, &allocator);
        true
    }
}

fn allocate_on_bank<B: AbsoluteIndexing>(code: &mut Code) -> Result<(), RegAllocError> {
    let mut iterations = 0;
    loop {
        iterations += 1;
        if iterations > MAX_OUTER_ITERATIONS {
            return Err(RegAllocError::DidNotConverge {
                bank: B::BANK,
                iterations: iterations - 1,
            });
        }
        if allocate_on_bank_once::<B>(code) {
            return Ok(());
        }
    }
}

/// Runs both banks against one shared liveness computation. Returns, per
/// bank, whether it colored without spilling (in which case the program was
/// rewritten for that bank).
fn coupled_round(code: &mut Code) -> (bool, bool) {
    let (gp_allocator, fp_allocator) = {
        let mut gp_allocator = ColoringAllocator::<GpIndexing>::new(code);
        let mut fp_allocator = ColoringAllocator::<FpIndexing>::new(code);

        let mut adapter = UnifiedTmpLivenessAdapter::new(code);
        let mut liveness = Liveness::new(&mut adapter);
        liveness.compute();

        for block_index in 0..code.blocks.len() {
            let block = BasicBlockId(block_index);
            let mut local_calc = LocalCalc::new(&mut liveness, block);
            for inst_index in (0..code.block(block).insts.len()).rev() {
                let inst = &code.block(block).insts[inst_index];
                gp_allocator.build(inst, &local_calc);
                fp_allocator.build(inst, &local_calc);
                local_calc.execute(inst_index);
            }
        }

        gp_allocator.allocate();
        fp_allocator.allocate();
        (gp_allocator, fp_allocator)
    };

    let mut gp_is_colored = false;
    let mut fp_is_colored = false;

    if gp_allocator.requires_spilling() {
        add_spill_and_fill::<GpIndexing>(code, gp_allocator.spilled_tmps());
    } else {
        assign_registers_to_program::<GpIndexing>(code, &gp_allocator);
        gp_is_colored = true;
    }
    if fp_allocator.requires_spilling() {
        add_spill_and_fill::<FpIndexing>(code, fp_allocator.spilled_tmps());
    } else {
        assign_registers_to_program::<FpIndexing>(code, &fp_allocator);
        fp_is_colored = true;
    }

    (gp_is_colored, fp_is_colored)
}

/// Colors every temporary of the program with a physical register of its
/// bank, coalescing redundant moves and lowering uncolorable temporaries to
/// stack slots, iterating until a fixed point.
pub fn iterated_register_coalescing(code: &mut Code) -> Result<(), RegAllocError> {
    phase_scope("lir::iterated_register_coalescing", || {
        code.reset_reachability();

        let mut gp_is_colored = false;
        let mut fp_is_colored = false;

        // Run both banks together as long as both keep spilling. The shared
        // liveness computation is the expensive part, so the coupled rounds
        // pay for it once.
        let mut coupled_iterations = 0;
        while !gp_is_colored && !fp_is_colored {
            coupled_iterations += 1;
            if coupled_iterations > MAX_OUTER_ITERATIONS {
                return Err(RegAllocError::DidNotConverge {
                    bank: Bank::GP,
                    iterations: coupled_iterations - 1,
                });
            }
            (gp_is_colored, fp_is_colored) = coupled_round(code);
        }

        if !gp_is_colored {
            allocate_on_bank::<GpIndexing>(code)?;
        }
        if !fp_is_colored {
            allocate_on_bank::<FpIndexing>(code)?;
        }
        Ok(())
    })
}
