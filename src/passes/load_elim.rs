//! Load elimination (spec §4.9 "Load elimination"), grounded on
//! `analysis/load_analysis.py`: per side-effect category, a flow-sensitive
//! map from address to the value(s) it may currently hold. A `load` whose
//! address resolves to exactly one known value becomes a plain `store`
//! (this IR's `assign`); joins at block heads intersect predecessor maps,
//! unioning value sets for keys common to all of them.
//!
//! Operand order: like every non-control-flow instruction, `mstore`/
//! `sstore`/`tstore` are stored internally reversed from their source
//! text (`mstore addr, val` reads `operands == [val, addr]`), confirmed
//! against `test_dft.py`'s "internal representation: mstore has [value,
//! location]" comment.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Pass;
use crate::analysis::{cfg, AnalysesCache, DominatorTree};
use crate::errors::VenomResult;
use crate::ir::{write_effects, EffectSet, Function, Instruction, Label, Opcode, Operand};
use alloy_primitives::U256;

struct Category {
    effect: EffectSet,
    load: Opcode,
    store: Option<Opcode>,
    granularity: u64,
}

const CATEGORIES: [Category; 5] = [
    Category { effect: EffectSet::MEMORY, load: Opcode::MLoad, store: Some(Opcode::MStore), granularity: 32 },
    Category { effect: EffectSet::TRANSIENT, load: Opcode::TLoad, store: Some(Opcode::TStore), granularity: 1 },
    Category { effect: EffectSet::STORAGE, load: Opcode::SLoad, store: Some(Opcode::SStore), granularity: 1 },
    Category { effect: EffectSet::IMMUTABLES, load: Opcode::DLoad, store: None, granularity: 1 },
    Category { effect: EffectSet::NONE, load: Opcode::CallDataLoad, store: None, granularity: 1 },
];

pub struct LoadElimination;

impl Pass for LoadElimination {
    fn name(&self) -> &'static str {
        "load_elim"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        cfg::calculate_cfg(func)?;
        let rpo: Vec<Label> = cache.request::<DominatorTree>(func)?.reverse_postorder().to_vec();

        let mut any_changed = false;
        for category in &CATEGORIES {
            if rewrite_category(func, &rpo, category)? {
                any_changed = true;
            }
        }
        if any_changed {
            cache.invalidate_instruction_dependents();
        }
        Ok(any_changed)
    }
}

type Lattice = FxHashMap<Operand, FxHashSet<Operand>>;

fn merge(preds: &[Label], bb_lattice: &FxHashMap<Label, Lattice>) -> Lattice {
    let mut iter = preds.iter();
    let Some(first) = iter.next() else { return Lattice::default() };
    let mut result = bb_lattice.get(first).cloned().unwrap_or_default();
    for pred in iter {
        let other = bb_lattice.get(pred).cloned().unwrap_or_default();
        let mut merged = Lattice::default();
        for (key, values) in &result {
            if let Some(other_values) = other.get(key) {
                merged.insert(key.clone(), values.union(other_values).cloned().collect());
            }
        }
        result = merged;
    }
    result
}

fn conflicts(a: U256, b: U256, granularity: u64) -> bool {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    (hi - lo) < U256::from(granularity)
}

/// Apply one instruction's effect on `lattice` in place.
fn step(lattice: &mut Lattice, category: &Category, inst: &Instruction) {
    if inst.opcode == category.load {
        let addr = inst.operands[0].clone();
        if let Some(out) = &inst.output {
            let mut set = FxHashSet::default();
            set.insert(Operand::from(out.clone()));
            lattice.insert(addr, set);
        }
        return;
    }
    if Some(inst.opcode) == category.store {
        // source text `store_op addr, val`; internal storage reverses to
        // [val, addr].
        let val = inst.operands[0].clone();
        let addr = inst.operands[1].clone();
        if let Some(addr_lit) = addr.as_literal() {
            let has_variable_key = lattice.keys().any(Operand::is_variable);
            if has_variable_key {
                lattice.clear();
            } else {
                lattice.retain(|key, _| {
                    let existing = key.as_literal().expect("literal-only lattice");
                    !conflicts(addr_lit, existing, category.granularity)
                });
            }
        } else {
            lattice.clear();
        }
        let mut set = FxHashSet::default();
        set.insert(val);
        lattice.insert(addr, set);
        return;
    }
    if !category.effect.is_empty() && write_effects(inst.opcode).intersects(category.effect) {
        lattice.clear();
    }
}

fn rewrite_category(func: &mut Function, rpo: &[Label], category: &Category) -> VenomResult<bool> {
    let mut bb_lattice: FxHashMap<Label, Lattice> = FxHashMap::default();

    let max_sweeps = rpo.len() + 4;
    for _ in 0..max_sweeps {
        let mut converged = true;
        for label in rpo {
            let preds: Vec<Label> = func.try_get_block(label)?.cfg_in.iter().cloned().collect();
            let mut lattice = merge(&preds, &bb_lattice);

            let count = func.try_get_block(label)?.instructions.len();
            for idx in 0..count {
                let inst = func.try_get_block(label)?.instructions[idx].clone();
                step(&mut lattice, category, &inst);
            }

            if bb_lattice.get(label) != Some(&lattice) {
                converged = false;
                bb_lattice.insert(label.clone(), lattice);
            }
        }
        if converged {
            break;
        }
    }

    let mut any_changed = false;
    for label in rpo {
        let preds: Vec<Label> = func.try_get_block(label)?.cfg_in.iter().cloned().collect();
        let mut lattice = merge(&preds, &bb_lattice);

        let count = func.try_get_block(label)?.instructions.len();
        for idx in 0..count {
            let inst = func.try_get_block(label)?.instructions[idx].clone();
            if inst.opcode == category.load {
                let addr = &inst.operands[0];
                if let Some(values) = lattice.get(addr) {
                    if values.len() == 1 {
                        let value = values.iter().next().expect("len == 1").clone();
                        if let Some(out) = &inst.output {
                            let block = func.get_block_mut(label).expect("label exists");
                            block.instructions[idx] = Instruction::new(Opcode::Store, vec![value], Some(out.clone()));
                            any_changed = true;
                        }
                    }
                }
            }
            step(&mut lattice, category, &inst);
        }
    }

    Ok(any_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Variable;

    #[test]
    fn known_mload_becomes_store() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(10u64)), Operand::literal(U256::from(10u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MLoad,
            vec![Operand::literal(U256::from(10u64))],
            Some(Variable::new("r")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = LoadElimination.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        let load = &func.entry().instructions[1];
        assert_eq!(load.opcode, Opcode::Store);
        assert_eq!(load.operands[0].as_literal(), Some(U256::from(10u64)));
    }

    #[test]
    fn variable_address_store_clears_prior_literals() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(0u64)), Operand::literal(U256::from(0u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("p"))));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::literal(U256::from(1u64)), Operand::from(Variable::new("p"))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MLoad,
            vec![Operand::literal(U256::from(0u64))],
            Some(Variable::new("r")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        LoadElimination.run(&mut func, &mut cache).unwrap();
        // the variable-address store must have wiped the literal-0 entry,
        // so the later mload of address 0 is no longer known and survives.
        let load = &func.entry().instructions[3];
        assert_eq!(load.opcode, Opcode::MLoad);
    }
}
