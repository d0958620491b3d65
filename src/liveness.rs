//! Backward liveness over an arbitrary CFG. The allocator consumes this
//! through [`LocalCalc`], which walks one block in reverse and exposes, after
//! each step, the set of things live just after the current instruction.

use std::{borrow::Cow, fmt::Debug, hash::Hash};

use indexmap::IndexMap;

pub trait Graph {
    type Node: Copy + Eq + Hash + Ord + Debug;

    fn num_nodes(&self) -> usize;
    fn node(&self, index: usize) -> Option<Self::Node>;
    fn node_index(&self, node: Self::Node) -> usize;
    fn successors(&self, node: Self::Node) -> Cow<'_, [Self::Node]>;
    fn predecessors(&self, node: Self::Node) -> Cow<'_, [Self::Node]>;
}

/// What a client has to provide to run liveness: a CFG, a dense index space,
/// and the use/def actions at every instruction boundary of every block.
/// Boundary `i` sits just before instruction `i`; boundary `len` is past the
/// last instruction.
pub trait LivenessAdapter {
    type Thing: Copy + Eq + Debug;
    type CFG: Graph;

    fn cfg(&self) -> &Self::CFG;
    fn prepare_to_compute(&mut self);
    fn num_indices(&self) -> usize;
    fn value_to_index(&self, thing: Self::Thing) -> usize;
    fn index_to_value(&self, index: usize) -> Self::Thing;
    fn block_size(&self, block: <Self::CFG as Graph>::Node) -> usize;

    fn for_each_use(
        &self,
        block: <Self::CFG as Graph>::Node,
        boundary: usize,
        func: impl FnMut(usize),
    );

    fn for_each_def(
        &self,
        block: <Self::CFG as Graph>::Node,
        boundary: usize,
        func: impl FnMut(usize),
    );
}

pub struct Liveness<'a, A: LivenessAdapter> {
    pub adapter: &'a mut A,
    workset: IndexSparseSet,
    live_at_head: IndexMap<<A::CFG as Graph>::Node, Vec<usize>>,
    live_at_tail: IndexMap<<A::CFG as Graph>::Node, Vec<usize>>,
}

impl<'a, A: LivenessAdapter> Liveness<'a, A> {
    pub fn new(adapter: &'a mut A) -> Self {
        Liveness {
            workset: IndexSparseSet::new(adapter.num_indices()),
            adapter,
            live_at_head: IndexMap::new(),
            live_at_tail: IndexMap::new(),
        }
    }

    pub fn raw_live_at_head(&self, block: <A::CFG as Graph>::Node) -> &[usize] {
        self.live_at_head.get(&block).unwrap()
    }

    pub fn raw_live_at_tail(&self, block: <A::CFG as Graph>::Node) -> &[usize] {
        self.live_at_tail.get(&block).unwrap()
    }

    pub fn compute(&mut self) {
        self.adapter.prepare_to_compute();

        for block_index in 0..self.adapter.cfg().num_nodes() {
            if let Some(block) = self.adapter.cfg().node(block_index) {
                self.live_at_head.insert(block, Vec::new());
                self.live_at_tail.insert(block, Vec::new());
            }
        }

        let mut changed = true;
        while changed {
            changed = false;

            for block_index in (0..self.adapter.cfg().num_nodes()).rev() {
                let Some(block) = self.adapter.cfg().node(block_index) else {
                    continue;
                };

                {
                    let mut local_calc = LocalCalc::new(self, block);
                    for inst_index in (0..local_calc.liveness.adapter.block_size(block)).rev() {
                        local_calc.execute(inst_index);
                    }
                }

                let mut head: Vec<usize> = self.workset.values().to_vec();
                head.sort_unstable();

                if *self.live_at_head.get(&block).unwrap() == head {
                    continue;
                }

                let predecessors = self.adapter.cfg().predecessors(block).into_owned();
                for predecessor in predecessors {
                    let tail = self.live_at_tail.get_mut(&predecessor).unwrap();
                    merge_deduplicated_sorted(tail, &head);
                }

                self.live_at_head.insert(block, head);
                changed = true;
            }
        }
    }
}

/// Merges the sorted, deduplicated `src` into the sorted, deduplicated `dst`.
fn merge_deduplicated_sorted(dst: &mut Vec<usize>, src: &[usize]) {
    if src.is_empty() {
        return;
    }
    if dst.is_empty() {
        dst.extend_from_slice(src);
        return;
    }

    let mut merged = Vec::with_capacity(dst.len() + src.len());
    let mut left = dst.iter().copied().peekable();
    let mut right = src.iter().copied().peekable();

    loop {
        match (left.peek(), right.peek()) {
            (Some(&l), Some(&r)) => {
                if l < r {
                    merged.push(l);
                    left.next();
                } else if r < l {
                    merged.push(r);
                    right.next();
                } else {
                    merged.push(l);
                    left.next();
                    right.next();
                }
            }
            (Some(&l), None) => {
                merged.push(l);
                left.next();
            }
            (None, Some(&r)) => {
                merged.push(r);
                right.next();
            }
            (None, None) => break,
        }
    }

    *dst = merged;
}

pub struct LocalCalc<'a, 'b, A: LivenessAdapter> {
    pub liveness: &'a mut Liveness<'b, A>,
    pub block: <A::CFG as Graph>::Node,
}

impl<'a, 'b, A: LivenessAdapter> LocalCalc<'a, 'b, A> {
    /// Seeds the working set with everything live at the tail of `block`.
    pub fn new(liveness: &'a mut Liveness<'b, A>, block: <A::CFG as Graph>::Node) -> Self {
        let this = LocalCalc { liveness, block };
        let live_at_tail = this.liveness.live_at_tail.get(&block).unwrap().clone();
        let workset = &mut this.liveness.workset;
        workset.clear();
        for index in live_at_tail {
            workset.add(index);
        }
        this
    }

    pub fn live(&self) -> LiveSet<'_, 'b, A> {
        LiveSet {
            liveness: &*self.liveness,
        }
    }

    pub fn is_live(&self, thing: A::Thing) -> bool {
        self.live().contains(thing)
    }

    /// Steps backward across instruction `inst_index`: kills its defs, then
    /// makes its uses live.
    pub fn execute(&mut self, inst_index: usize) {
        let workset = &mut self.liveness.workset;

        self.liveness
            .adapter
            .for_each_def(self.block, inst_index + 1, |index| {
                workset.remove(index);
            });

        self.liveness
            .adapter
            .for_each_use(self.block, inst_index, |index| {
                workset.add(index);
            });
    }
}

pub struct LiveSet<'a, 'b, A: LivenessAdapter> {
    liveness: &'a Liveness<'b, A>,
}

impl<'a, 'b, A: LivenessAdapter> LiveSet<'a, 'b, A> {
    pub fn contains(&self, thing: A::Thing) -> bool {
        self.liveness
            .workset
            .contains(self.liveness.adapter.value_to_index(thing))
    }

    pub fn iter(&self) -> impl Iterator<Item = A::Thing> + '_ {
        self.liveness
            .workset
            .values()
            .iter()
            .map(move |&index| self.liveness.adapter.index_to_value(index))
    }
}

/// An efficient set of integers valued between zero and a fixed size, in the
/// Briggs sparse-set representation: the backing map is never initialized, and
/// membership is validated by cross-checking the dense value list.
#[derive(Debug)]
pub struct IndexSparseSet {
    map: Vec<usize>,
    values: Vec<usize>,
}

impl IndexSparseSet {
    pub fn new(size: usize) -> Self {
        IndexSparseSet {
            map: vec![0; size],
            values: Vec::new(),
        }
    }

    pub fn contains(&self, value: usize) -> bool {
        match self.map.get(value) {
            Some(&position) => position < self.values.len() && self.values[position] == value,
            None => false,
        }
    }

    pub fn add(&mut self, value: usize) -> bool {
        if self.contains(value) {
            return false;
        }
        self.map[value] = self.values.len();
        self.values.push(value);
        true
    }

    pub fn remove(&mut self, value: usize) -> bool {
        if !self.contains(value) {
            return false;
        }
        let position = self.map[value];
        let last_value = *self.values.last().unwrap();
        self.values[position] = last_value;
        self.map[last_value] = position;
        self.values.pop();
        true
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[usize] {
        &self.values
    }
}
