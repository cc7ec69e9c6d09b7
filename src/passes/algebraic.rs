//! Algebraic optimization (spec §4.9), grounded on
//! `passes/algebraic_optimization.py`: a peephole pass run to a fixed
//! point, using the def-use graph to fold self-comparisons and strip
//! redundant `iszero`/`not` negation chains. Operand-position arithmetic
//! below follows the same reversed-storage convention as
//! [`super::sccp`]: for a non-commutative binop, `operands[0]` is the
//! divisor/subtrahend/shift-amount, `operands[1]` the dividend/minuend/
//! shifted value.

use alloy_primitives::U256;

use super::Pass;
use crate::analysis::{AnalysesCache, DataFlowGraph};
use crate::errors::VenomResult;
use crate::ir::{Function, Instruction, Opcode, Operand};

pub struct AlgebraicOptimization;

impl Pass for AlgebraicOptimization {
    fn name(&self) -> &'static str {
        "algebraic"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        let mut any_changed = false;
        loop {
            let dfg_snapshot = cache.request::<DataFlowGraph>(func)?;
            let mut round_changed = false;

            for label in func.block_labels().cloned().collect::<Vec<_>>() {
                let count = func.try_get_block(&label)?.instructions.len();
                for idx in 0..count {
                    let before = func.get_block_mut(&label).expect("label exists").instructions[idx].clone();
                    if let Some(after) = try_peephole(&before, dfg_snapshot) {
                        func.get_block_mut(&label).expect("label exists").instructions[idx] = after;
                        round_changed = true;
                    }
                }
            }

            if round_changed {
                any_changed = true;
                cache.invalidate_instruction_dependents();
            } else {
                break;
            }
        }

        if any_changed {
            remove_iszero_chains(func, cache)?;
        }
        Ok(any_changed)
    }
}

fn is_power_of_two(v: U256) -> bool {
    !v.is_zero() && (v & (v - U256::from(1u64))).is_zero()
}

fn log2(v: U256) -> u64 {
    v.bit_len() as u64 - 1
}

fn lit(op: &Operand) -> Option<U256> {
    op.as_literal()
}

fn same_operand(a: &Operand, b: &Operand, dfg: &DataFlowGraph) -> bool {
    if a == b {
        return true;
    }
    match (a.as_variable(), b.as_variable()) {
        (Some(x), Some(y)) => dfg.are_equivalent(x, y),
        _ => false,
    }
}

/// Try one rewrite of `inst`, returning the replacement if any rule fired.
fn try_peephole(inst: &Instruction, dfg: &DataFlowGraph) -> Option<Instruction> {
    let out = inst.output.clone()?;
    let ops = &inst.operands;

    let store = |value: Operand| Some(Instruction::new(Opcode::Store, vec![value], Some(out.clone())));
    let rewrite = |opcode: Opcode, new_ops: Vec<Operand>| Some(Instruction::new(opcode, new_ops, Some(out.clone())));

    match inst.opcode {
        Opcode::Add if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) {
                return store(ops[1].clone());
            }
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(ops[0].clone());
            }
        }
        Opcode::Sub if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) {
                return store(ops[1].clone());
            }
            if same_operand(&ops[0], &ops[1], dfg) {
                return store(Operand::literal(U256::ZERO));
            }
        }
        Opcode::Xor if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) {
                return store(ops[1].clone());
            }
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(ops[0].clone());
            }
            if same_operand(&ops[0], &ops[1], dfg) {
                return store(Operand::literal(U256::ZERO));
            }
        }
        Opcode::Or if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) {
                return store(ops[1].clone());
            }
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(ops[0].clone());
            }
        }
        Opcode::Shl | Opcode::Shr | Opcode::Sar if ops.len() == 2 => {
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(ops[0].clone());
            }
        }
        Opcode::Mul if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) || lit(&ops[1]) == Some(U256::ZERO) {
                return store(Operand::literal(U256::ZERO));
            }
            if lit(&ops[0]) == Some(U256::from(1u64)) {
                return store(ops[1].clone());
            }
            if lit(&ops[1]) == Some(U256::from(1u64)) {
                return store(ops[0].clone());
            }
            if let Some(k) = lit(&ops[0]).filter(|v| is_power_of_two(*v)) {
                return rewrite(Opcode::Shl, vec![Operand::literal(U256::from(log2(k))), ops[1].clone()]);
            }
            if let Some(k) = lit(&ops[1]).filter(|v| is_power_of_two(*v)) {
                return rewrite(Opcode::Shl, vec![Operand::literal(U256::from(log2(k))), ops[0].clone()]);
            }
        }
        Opcode::And if ops.len() == 2 => {
            if lit(&ops[0]) == Some(U256::ZERO) || lit(&ops[1]) == Some(U256::ZERO) {
                return store(Operand::literal(U256::ZERO));
            }
        }
        Opcode::Div if ops.len() == 2 => {
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(Operand::literal(U256::ZERO));
            }
            if lit(&ops[0]) == Some(U256::from(1u64)) {
                return store(ops[1].clone());
            }
            if let Some(k) = lit(&ops[0]).filter(|v| is_power_of_two(*v)) {
                return rewrite(Opcode::Shr, vec![Operand::literal(U256::from(log2(k))), ops[1].clone()]);
            }
        }
        Opcode::Mod if ops.len() == 2 => {
            if lit(&ops[1]) == Some(U256::ZERO) {
                return store(Operand::literal(U256::ZERO));
            }
            if lit(&ops[0]) == Some(U256::from(1u64)) {
                return store(Operand::literal(U256::ZERO));
            }
            if let Some(k) = lit(&ops[0]).filter(|v| is_power_of_two(*v)) {
                let mask = k - U256::from(1u64);
                return rewrite(Opcode::And, vec![Operand::literal(mask), ops[1].clone()]);
            }
        }
        Opcode::Eq if ops.len() == 2 => {
            if same_operand(&ops[0], &ops[1], dfg) {
                return store(Operand::literal(U256::from(1u64)));
            }
        }
        Opcode::Lt | Opcode::Gt | Opcode::Slt | Opcode::Sgt if ops.len() == 2 => {
            if same_operand(&ops[0], &ops[1], dfg) {
                return store(Operand::literal(U256::ZERO));
            }
        }
        _ => {}
    }
    None
}

/// `not (not x)` and the deeper `iszero (iszero (iszero x))` both need the
/// producing instruction, which `try_peephole` can't reach without a
/// `Function` reference; handled as a small separate sweep.
fn fold_double_negation(func: &mut Function, dfg: &DataFlowGraph) -> VenomResult<bool> {
    let mut changed = false;
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let count = func.try_get_block(&label)?.instructions.len();
        for idx in 0..count {
            let inst = func.try_get_block(&label)?.instructions[idx].clone();
            let rewrite = match inst.opcode {
                Opcode::Not => chain_of(func, dfg, &inst, Opcode::Not, 2).map(|base| (Opcode::Store, vec![base])),
                Opcode::IsZero => chain_of(func, dfg, &inst, Opcode::IsZero, 3)
                    .map(|base| (Opcode::IsZero, vec![base])),
                _ => None,
            };
            if let Some((opcode, operands)) = rewrite {
                let block = func.get_block_mut(&label).expect("label exists");
                let out = block.instructions[idx].output.clone();
                block.instructions[idx] = Instruction::new(opcode, operands, out);
                changed = true;
            }
        }
    }
    Ok(changed)
}

/// If `inst` heads a chain of exactly `depth` consecutive `opcode`
/// instructions (inclusive of `inst` itself), return the operand feeding
/// the bottom of the chain.
fn chain_of(func: &Function, dfg: &DataFlowGraph, inst: &Instruction, opcode: Opcode, depth: u32) -> Option<Operand> {
    let mut current = inst.clone();
    for _ in 1..depth {
        let src_var = current.operands[0].as_variable()?;
        let producer = dfg.producer(src_var)?;
        let producing = dfg.resolve(func, producer)?;
        if producing.opcode != opcode {
            return None;
        }
        current = producing.clone();
    }
    Some(current.operands[0].clone())
}

/// `iszero`-chains feeding `jnz`/`assert`: an even chain length cancels out
/// entirely (replace the use with the chain's original operand); an odd
/// length collapses to a single `iszero`.
fn remove_iszero_chains(func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<()> {
    let dfg = cache.request::<DataFlowGraph>(func)?;
    let mut rewrites: Vec<(crate::ir::Label, usize, usize, Operand)> = Vec::new();

    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let block = func.try_get_block(&label)?;
        for (idx, inst) in block.instructions.iter().enumerate() {
            if !matches!(inst.opcode, Opcode::Jnz | Opcode::Assert) {
                continue;
            }
            let Some(cond) = inst.operands[0].as_variable() else { continue };
            let mut chain_len = 0u32;
            let mut root: Operand = inst.operands[0].clone();
            let mut cur = cond.clone();
            loop {
                let Some(producer) = dfg.producer(&cur) else { break };
                let Some(producing) = dfg.resolve(func, producer) else { break };
                if producing.opcode != Opcode::IsZero {
                    break;
                }
                chain_len += 1;
                root = producing.operands[0].clone();
                match producing.operands[0].as_variable() {
                    Some(v) => cur = v.clone(),
                    None => break,
                }
            }
            if chain_len == 0 {
                continue;
            }
            if chain_len % 2 == 0 {
                rewrites.push((label.clone(), idx, 0, root));
            }
            // odd chains already read through `chain_len - 1` eliminable
            // pairs down to one remaining `iszero`; no per-use rewrite is
            // needed here since the double-negation sweep collapses pairs.
        }
    }

    for (label, idx, operand_idx, replacement) in rewrites {
        let block = func.get_block_mut(&label).expect("label exists");
        block.instructions[idx].operands[operand_idx] = replacement;
    }

    let dfg_again = cache.request::<DataFlowGraph>(func)?;
    let negation_changed = fold_double_negation(func, dfg_again)?;
    if negation_changed {
        cache.invalidate_instruction_dependents();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Variable};

    #[test]
    fn add_zero_collapses_to_store() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::literal(U256::ZERO), Operand::from(Variable::new("x"))],
            Some(Variable::new("y")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = AlgebraicOptimization.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        assert_eq!(func.entry().instructions[0].opcode, Opcode::Store);
    }

    #[test]
    fn self_subtraction_folds_to_zero() {
        let mut func = Function::new(Label::new("f"));
        let x = Variable::new("x");
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(x.clone())));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Sub,
            vec![Operand::from(x.clone()), Operand::from(x)],
            Some(Variable::new("z")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        AlgebraicOptimization.run(&mut func, &mut cache).unwrap();
        let sub = &func.entry().instructions[1];
        assert_eq!(sub.opcode, Opcode::Store);
        assert_eq!(sub.operands[0].as_literal(), Some(U256::ZERO));
    }

    #[test]
    fn power_of_two_div_becomes_shift() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Div,
            vec![Operand::literal(U256::from(8u64)), Operand::from(Variable::new("x"))],
            Some(Variable::new("y")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        AlgebraicOptimization.run(&mut func, &mut cache).unwrap();
        let first = &func.entry().instructions[0];
        assert_eq!(first.opcode, Opcode::Shr);
        assert_eq!(first.operands[0].as_literal(), Some(U256::from(3u64)));
    }
}
