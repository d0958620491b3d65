//! Interference edge storage. Conceptually an interference graph is just a set
//! of unordered pairs of vertex indices; the allocator keeps adjacency lists
//! on the side, so all that is needed here is a fast membership structure.
//!
//! Two implementations with different tradeoffs:
//! - `InterferenceBitVector` is a dense bit matrix, quadratic in the maximum
//!   vertex index. It is the fastest for small programs.
//! - `InterferenceHashSet` stores each edge once as a packed 64-bit
//!   `(min << 32) | max` key. It is the right choice once the matrix would
//!   get large.
//!
//! `Interference` wraps the two behind one type so the allocator can pick at
//! runtime based on problem size.

use std::collections::HashSet;

use super::bitvector::BitVector;

pub trait InterferenceGraph {
    fn contains(&self, u: u32, v: u32) -> bool;
    fn add_and_return_is_new_entry(&mut self, u: u32, v: u32) -> bool;
    fn add(&mut self, u: u32, v: u32) {
        self.add_and_return_is_new_entry(u, v);
    }
    fn clear(&mut self);
    fn set_max_index(&mut self, n: u32);
    fn for_each(&self, functor: impl FnMut(u32, u32));
    fn size(&self) -> usize;
}

/// Dense bit matrix. Both directions of an edge are stored so `contains` is a
/// single probe.
#[derive(Default)]
pub struct InterferenceBitVector {
    bitvector: BitVector,
    num_elements: u32,
    size: usize,
}

impl InterferenceBitVector {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, i: u32, j: u32) -> usize {
        (i * self.num_elements + j) as usize
    }
}

impl InterferenceGraph for InterferenceBitVector {
    fn contains(&self, u: u32, v: u32) -> bool {
        self.bitvector.quick_get(self.index(u, v))
    }

    fn add_and_return_is_new_entry(&mut self, u: u32, v: u32) -> bool {
        let index = self.index(u, v);
        let already_in = self.bitvector.quick_set(index, true);
        let mirror = self.index(v, u);
        let mirror_already_in = self.bitvector.quick_set(mirror, true);
        debug_assert!(already_in == mirror_already_in);
        self.size += !already_in as usize;
        !already_in
    }

    fn clear(&mut self) {
        self.bitvector.clear_all();
        self.size = 0;
    }

    fn set_max_index(&mut self, n: u32) {
        self.num_elements = n;
        self.bitvector.ensure_size(n as usize * n as usize);
    }

    fn for_each(&self, mut functor: impl FnMut(u32, u32)) {
        for i in 0..self.num_elements {
            for j in i + 1..self.num_elements {
                if self.contains(i, j) {
                    functor(i, j);
                }
            }
        }
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// Packed-pair hash set. An edge between any two vertices is represented by
/// the concatenation of the smaller index followed by the bigger one.
#[derive(Default)]
pub struct InterferenceHashSet {
    edges: HashSet<u64>,
}

impl InterferenceHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn pack(mut u: u32, mut v: u32) -> u64 {
        if v < u {
            std::mem::swap(&mut u, &mut v);
        }
        (u as u64) << 32 | v as u64
    }
}

impl InterferenceGraph for InterferenceHashSet {
    fn contains(&self, u: u32, v: u32) -> bool {
        self.edges.contains(&Self::pack(u, v))
    }

    fn add_and_return_is_new_entry(&mut self, u: u32, v: u32) -> bool {
        self.edges.insert(Self::pack(u, v))
    }

    fn clear(&mut self) {
        self.edges.clear();
    }

    fn set_max_index(&mut self, _n: u32) {}

    fn for_each(&self, mut functor: impl FnMut(u32, u32)) {
        for &packed in self.edges.iter() {
            functor((packed >> 32) as u32, packed as u32);
        }
    }

    fn size(&self) -> usize {
        self.edges.len()
    }
}

/// Past this many vertices the quadratic bit matrix stops being a good deal.
pub const MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH: usize = 400;

pub enum Interference {
    Small(InterferenceBitVector),
    Large(InterferenceHashSet),
}

impl Interference {
    pub fn for_max_index(n: usize) -> Self {
        let mut graph = if n < MAX_SIZE_FOR_SMALL_INTERFERENCE_GRAPH {
            Interference::Small(InterferenceBitVector::new())
        } else {
            Interference::Large(InterferenceHashSet::new())
        };
        graph.set_max_index(n as u32);
        graph
    }
}

impl InterferenceGraph for Interference {
    fn contains(&self, u: u32, v: u32) -> bool {
        match self {
            Interference::Small(graph) => graph.contains(u, v),
            Interference::Large(graph) => graph.contains(u, v),
        }
    }

    fn add_and_return_is_new_entry(&mut self, u: u32, v: u32) -> bool {
        match self {
            Interference::Small(graph) => graph.add_and_return_is_new_entry(u, v),
            Interference::Large(graph) => graph.add_and_return_is_new_entry(u, v),
        }
    }

    fn clear(&mut self) {
        match self {
            Interference::Small(graph) => graph.clear(),
            Interference::Large(graph) => graph.clear(),
        }
    }

    fn set_max_index(&mut self, n: u32) {
        match self {
            Interference::Small(graph) => graph.set_max_index(n),
            Interference::Large(graph) => graph.set_max_index(n),
        }
    }

    fn for_each(&self, functor: impl FnMut(u32, u32)) {
        match self {
            Interference::Small(graph) => graph.for_each(functor),
            Interference::Large(graph) => graph.for_each(functor),
        }
    }

    fn size(&self) -> usize {
        match self {
            Interference::Small(graph) => graph.size(),
            Interference::Large(graph) => graph.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(graph: &mut impl InterferenceGraph) {
        assert!(!graph.contains(1, 2));
        assert!(graph.add_and_return_is_new_entry(1, 2));
        assert!(!graph.add_and_return_is_new_entry(2, 1));
        assert!(graph.contains(1, 2));
        assert!(graph.contains(2, 1));
        graph.add(3, 1);
        assert_eq!(graph.size(), 2);

        let mut edges = Vec::new();
        graph.for_each(|u, v| edges.push((u.min(v), u.max(v))));
        edges.sort();
        assert_eq!(edges, vec![(1, 2), (1, 3)]);

        graph.clear();
        assert_eq!(graph.size(), 0);
        assert!(!graph.contains(1, 2));
    }

    #[test]
    fn bit_matrix() {
        let mut graph = InterferenceBitVector::new();
        graph.set_max_index(8);
        exercise(&mut graph);
    }

    #[test]
    fn packed_set() {
        let mut graph = InterferenceHashSet::new();
        graph.set_max_index(8);
        exercise(&mut graph);
    }

    #[test]
    fn size_selection() {
        assert!(matches!(
            Interference::for_max_index(16),
            Interference::Small(_)
        ));
        assert!(matches!(
            Interference::for_max_index(4096),
            Interference::Large(_)
        ));
    }
}
