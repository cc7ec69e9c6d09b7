//! The effect system (spec §3): a closed set of resources an instruction can
//! read or write, used to build barrier edges for scheduling
//! ([`crate::passes::dft`]) and to gate load elimination
//! ([`crate::analysis::alias`]).
//!
//! Modeled as a small bitset rather than an enum-of-variants, the same shape
//! `cranelift-codegen`'s `ir::MemFlags` takes for a handful of orthogonal
//! yes/no properties packed into one word.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::opcode::Opcode;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectSet(u8);

impl EffectSet {
    pub const NONE: EffectSet = EffectSet(0);
    pub const MEMORY: EffectSet = EffectSet(1 << 0);
    pub const STORAGE: EffectSet = EffectSet(1 << 1);
    pub const TRANSIENT: EffectSet = EffectSet(1 << 2);
    pub const IMMUTABLES: EffectSet = EffectSet(1 << 3);
    pub const BALANCE: EffectSet = EffectSet(1 << 4);
    pub const RETURNDATA: EffectSet = EffectSet(1 << 5);
    /// Synthetic catch-all used by instructions whose effect can't be
    /// narrowed further (`call`, `create`, `invoke`): conflicts with every
    /// other effect, including itself across two different instructions.
    pub const ALL: EffectSet =
        EffectSet(Self::MEMORY.0 | Self::STORAGE.0 | Self::TRANSIENT.0 | Self::IMMUTABLES.0 | Self::BALANCE.0 | Self::RETURNDATA.0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: EffectSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: EffectSet) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EffectSet {
    type Output = EffectSet;
    fn bitor(self, rhs: EffectSet) -> EffectSet {
        EffectSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for EffectSet {
    fn bitor_assign(&mut self, rhs: EffectSet) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for EffectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{{}}");
        }
        let mut names = Vec::new();
        for (bit, name) in [
            (EffectSet::MEMORY, "memory"),
            (EffectSet::STORAGE, "storage"),
            (EffectSet::TRANSIENT, "transient"),
            (EffectSet::IMMUTABLES, "immutables"),
            (EffectSet::BALANCE, "balance"),
            (EffectSet::RETURNDATA, "returndata"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// The set of resources `op` reads, ignoring any stack operands (those are
/// tracked by the DFG, not the effect system).
pub fn read_effects(op: Opcode) -> EffectSet {
    use Opcode::*;
    match op {
        MLoad | MCopy | MSize | CallDataCopy | CodeCopy | ExtCodeCopy | Sha3 => EffectSet::MEMORY,
        SLoad => EffectSet::STORAGE,
        TLoad => EffectSet::TRANSIENT,
        ReturnDataCopy | ReturnDataSize => EffectSet::RETURNDATA,
        Balance | SelfBalance => EffectSet::BALANCE,
        DLoad | DLoadBytes => EffectSet::IMMUTABLES,
        Return | Revert | Log0 | Log1 | Log2 | Log3 | Log4 => EffectSet::MEMORY,
        Call | CallCode | DelegateCall | StaticCall | Create | Create2 | Invoke => EffectSet::ALL,
        _ => EffectSet::NONE,
    }
}

/// The set of resources `op` writes.
pub fn write_effects(op: Opcode) -> EffectSet {
    use Opcode::*;
    match op {
        MStore | MCopy | CallDataCopy | CodeCopy | ExtCodeCopy => EffectSet::MEMORY,
        SStore => EffectSet::STORAGE,
        TStore => EffectSet::TRANSIENT,
        Call | CallCode | DelegateCall | StaticCall | Create | Create2 | Invoke => EffectSet::ALL,
        _ => EffectSet::NONE,
    }
}
