//! Memory alias analysis (spec §4.7): byte-interval overlap plus an
//! explicit union-find for volatility propagation, over the three
//! byte-addressed resources (`memory`, `storage`, `transient`) this core's
//! load/store passes care about.
//!
//! Grounded conceptually on `cranelift-codegen`'s `alias_analysis.rs`
//! (`LastStores`), which also keys memory accesses by a flags-derived
//! category to decide what may conflict with what; that analysis tracks
//! whole categories, while this one needs concrete byte intervals, so the
//! core alias rule here is interval overlap rather than category equality.

use rustc_hash::FxHashMap;

use super::Analysis;
use crate::errors::VenomResult;
use crate::ir::{Function, Opcode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Aliases everything except [`MemoryLocation::Empty`]. Used when an
    /// address can't be bounded statically (e.g. a variable offset).
    Full,
    /// Aliases nothing, not even itself.
    Empty,
    Concrete { offset: u64, size: u32, volatile: bool },
}

impl MemoryLocation {
    pub fn concrete(offset: u64, size: u32) -> Self {
        MemoryLocation::Concrete { offset, size, volatile: false }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, MemoryLocation::Empty)
    }

    pub fn is_full(self) -> bool {
        matches!(self, MemoryLocation::Full)
    }

    pub fn is_volatile(self) -> bool {
        matches!(self, MemoryLocation::Concrete { volatile: true, .. })
    }
}

/// The byte width of one access to `opcode`'s resource, used to derive a
/// concrete `[offset, offset+size)` interval from a literal address.
pub fn access_size(opcode: Opcode) -> u32 {
    match opcode {
        Opcode::MStore | Opcode::MLoad => 32,
        Opcode::SStore | Opcode::SLoad | Opcode::TStore | Opcode::TLoad => 1,
        _ => 32,
    }
}

fn intervals_overlap(a: MemoryLocation, b: MemoryLocation) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.is_full() || b.is_full() {
        return true;
    }
    match (a, b) {
        (MemoryLocation::Concrete { offset: o1, size: s1, .. }, MemoryLocation::Concrete { offset: o2, size: s2, .. }) => {
            let (o1, s1, o2, s2) = (o1 as u128, s1 as u128, o2 as u128, s2 as u128);
            o1 < o2 + s2 && o2 < o1 + s1
        }
        _ => unreachable!("Full/Empty handled above"),
    }
}

/// Union-find over concrete locations seen so far, used only to propagate
/// volatility: two locations in the same class alias even if their
/// intervals don't currently overlap (e.g. after one was widened).
#[derive(Default)]
pub struct AliasAnalysis {
    parent: Vec<usize>,
    locations: Vec<MemoryLocation>,
    index_of: FxHashMap<(u64, u32), usize>,
}

impl Analysis for AliasAnalysis {
    fn analyze(_func: &mut Function) -> VenomResult<Self> {
        Ok(AliasAnalysis::default())
    }
}

impl AliasAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, loc: MemoryLocation) -> usize {
        let MemoryLocation::Concrete { offset, size, .. } = loc else {
            unreachable!("sentinels are never registered in the union-find")
        };
        if let Some(&idx) = self.index_of.get(&(offset, size)) {
            return idx;
        }
        let idx = self.locations.len();
        self.locations.push(loc);
        self.parent.push(idx);
        self.index_of.insert((offset, size), idx);
        idx
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            self.parent[i] = self.find(self.parent[i]);
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }

    pub fn may_alias(&mut self, a: MemoryLocation, b: MemoryLocation) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a.is_full() || b.is_full() {
            return true;
        }
        let (ia, ib) = (self.register(a), self.register(b));
        if self.find(ia) == self.find(ib) {
            return true;
        }
        intervals_overlap(a, b)
    }

    /// Mark `loc` volatile: it now aliases every location that already
    /// overlapped it (unioned transitively into its class), and returns
    /// the volatile-tagged location going forward.
    pub fn mark_volatile(&mut self, loc: MemoryLocation) -> MemoryLocation {
        let MemoryLocation::Concrete { offset, size, .. } = loc else { return loc };
        let idx = self.register(loc);
        let overlappers: Vec<usize> = (0..self.locations.len())
            .filter(|&i| i != idx && intervals_overlap(loc, self.locations[i]))
            .collect();
        for other in overlappers {
            self.union(idx, other);
        }
        self.locations[idx] = MemoryLocation::Concrete { offset, size, volatile: true };
        self.locations[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_never_aliases() {
        let mut a = AliasAnalysis::new();
        assert!(!a.may_alias(MemoryLocation::Empty, MemoryLocation::Full));
        assert!(!a.may_alias(MemoryLocation::Empty, MemoryLocation::concrete(0, 32)));
    }

    #[test]
    fn full_aliases_any_non_empty() {
        let mut a = AliasAnalysis::new();
        assert!(a.may_alias(MemoryLocation::Full, MemoryLocation::concrete(64, 32)));
    }

    #[test]
    fn overlapping_mstore_words_alias() {
        let mut a = AliasAnalysis::new();
        assert!(a.may_alias(MemoryLocation::concrete(0, 32), MemoryLocation::concrete(16, 32)));
        assert!(!a.may_alias(MemoryLocation::concrete(0, 32), MemoryLocation::concrete(32, 32)));
    }

    #[test]
    fn mark_volatile_unions_prior_overlappers() {
        let mut a = AliasAnalysis::new();
        let x = MemoryLocation::concrete(0, 32);
        let y = MemoryLocation::concrete(16, 32);
        a.register(x);
        a.register(y);
        a.mark_volatile(x);
        // y overlapped x at the time of marking, so they're unioned even
        // though we didn't separately mark y.
        assert!(a.may_alias(x, y));
    }
}
