//! Dead-store elimination (spec §4.9): the backward counterpart of
//! [`super::load_elim`]'s forward map. At each program point, track the set
//! of literal addresses "pending" — guaranteed, along every path forward
//! from here, to be overwritten by a later aliasing store before anything
//! reads or otherwise observes them. A store whose address is already
//! pending when it executes is provably dead and is nopped in place.
//!
//! This is a MUST analysis: the meet at a CFG merge is set intersection
//! (a guarantee has to hold on every successor path), so every block
//! starts each sweep at the "everything is dead" universal set — here
//! approximated by the set of every literal address this category's
//! stores ever target in the function — and shrinks monotonically by
//! intersection until the fixed point.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Pass;
use crate::analysis::{cfg, AnalysesCache, DominatorTree};
use crate::errors::VenomResult;
use crate::ir::{read_effects, write_effects, EffectSet, Function, Instruction, Label, Opcode};
use alloy_primitives::U256;

struct Category {
    effect: EffectSet,
    load: Opcode,
    store: Opcode,
    granularity: u64,
}

const CATEGORIES: [Category; 3] = [
    Category { effect: EffectSet::MEMORY, load: Opcode::MLoad, store: Opcode::MStore, granularity: 32 },
    Category { effect: EffectSet::TRANSIENT, load: Opcode::TLoad, store: Opcode::TStore, granularity: 1 },
    Category { effect: EffectSet::STORAGE, load: Opcode::SLoad, store: Opcode::SStore, granularity: 1 },
];

pub struct DeadStoreElimination;

impl Pass for DeadStoreElimination {
    fn name(&self) -> &'static str {
        "dead_store_elim"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        cfg::calculate_cfg(func)?;
        let rpo: Vec<Label> = cache.request::<DominatorTree>(func)?.reverse_postorder().to_vec();

        let mut any_changed = false;
        for category in &CATEGORIES {
            if eliminate_category(func, &rpo, category)? {
                any_changed = true;
            }
        }
        if any_changed {
            cache.invalidate_instruction_dependents();
        }
        Ok(any_changed)
    }
}

type Pending = FxHashSet<U256>;

fn conflicts(a: U256, b: U256, granularity: u64) -> bool {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    (hi - lo) < U256::from(granularity)
}

/// Backward transfer over one instruction: mutates `pending` from "valid
/// just after `inst`" to "valid just before it", and returns whether
/// `inst` is a store whose address was already pending, i.e. dead.
fn step(pending: &mut Pending, category: &Category, inst: &Instruction) -> bool {
    if inst.opcode == category.store {
        // source text `store_op addr, val`; internal storage reverses to
        // [val, addr], same convention `load_elim` relies on.
        let addr = inst.operands[1].as_literal();
        let dead = addr.map(|a| pending.contains(&a)).unwrap_or(false);
        if let Some(a) = addr {
            pending.insert(a);
        }
        return dead;
    }
    if inst.opcode == category.load {
        match inst.operands[0].as_literal() {
            Some(a) => pending.retain(|&p| !conflicts(p, a, category.granularity)),
            None => pending.clear(),
        }
        return false;
    }
    if read_effects(inst.opcode).intersects(category.effect)
        || (write_effects(inst.opcode).intersects(category.effect) && inst.opcode != category.store)
    {
        pending.clear();
    }
    false
}

fn merge_successors(label: &Label, func: &Function, bb_entry: &FxHashMap<Label, Pending>) -> VenomResult<Pending> {
    let successors: Vec<Label> = func.try_get_block(label)?.cfg_out.iter().cloned().collect();
    if successors.is_empty() {
        return Ok(Pending::default());
    }
    let mut iter = successors.iter();
    let first = iter.next().expect("non-empty");
    let mut merged = bb_entry.get(first).cloned().unwrap_or_default();
    for succ in iter {
        let other = bb_entry.get(succ).cloned().unwrap_or_default();
        merged.retain(|a| other.contains(a));
    }
    Ok(merged)
}

fn eliminate_category(func: &mut Function, rpo: &[Label], category: &Category) -> VenomResult<bool> {
    let mut universe: Pending = FxHashSet::default();
    for label in rpo {
        for inst in &func.try_get_block(label)?.instructions {
            if inst.opcode == category.store {
                if let Some(a) = inst.operands[1].as_literal() {
                    universe.insert(a);
                }
            }
        }
    }

    let mut bb_entry: FxHashMap<Label, Pending> = rpo.iter().map(|l| (l.clone(), universe.clone())).collect();

    let max_sweeps = rpo.len() + 4;
    for _ in 0..max_sweeps {
        let mut converged = true;
        for label in rpo.iter().rev() {
            let mut pending = merge_successors(label, func, &bb_entry)?;

            let count = func.try_get_block(label)?.instructions.len();
            for idx in (0..count).rev() {
                let inst = func.try_get_block(label)?.instructions[idx].clone();
                step(&mut pending, category, &inst);
            }

            if bb_entry.get(label) != Some(&pending) {
                converged = false;
                bb_entry.insert(label.clone(), pending);
            }
        }
        if converged {
            break;
        }
    }

    let mut any_changed = false;
    for label in rpo.iter().rev() {
        let mut pending = merge_successors(label, func, &bb_entry)?;

        let count = func.try_get_block(label)?.instructions.len();
        for idx in (0..count).rev() {
            let inst = func.try_get_block(label)?.instructions[idx].clone();
            let dead = step(&mut pending, category, &inst);
            if dead {
                func.get_block_mut(label).expect("label exists").instructions[idx].make_nop();
                any_changed = true;
            }
        }
    }

    Ok(any_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    #[test]
    fn store_killed_by_later_store_to_same_address_is_removed() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(0u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(2u64)), Operand::literal(U256::from(0u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = DeadStoreElimination.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        assert_eq!(func.entry().instructions[0].opcode, Opcode::Nop);
        assert_eq!(func.entry().instructions[1].opcode, Opcode::MStore);
    }

    #[test]
    fn store_observed_by_later_load_survives() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(0u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MLoad,
            vec![Operand::literal(U256::from(0u64))],
            Some(crate::ir::Variable::new("r")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = DeadStoreElimination.run(&mut func, &mut cache).unwrap();
        assert!(!changed);
        assert_eq!(func.entry().instructions[0].opcode, Opcode::MStore);
    }

    #[test]
    fn store_before_function_end_without_a_later_write_survives() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(0u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = DeadStoreElimination.run(&mut func, &mut cache).unwrap();
        assert!(!changed);
    }
}
