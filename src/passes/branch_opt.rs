//! Branch optimization (spec §4.9), grounded on
//! `tests/unit/compiler/venom/test_branch_optimizer.py` (the pass's own
//! module was folded into the distillation, but the test pins its exact
//! behavior): a `jnz` whose condition is produced by `iszero` is rewritten
//! to test the un-negated value directly, swapping the true/false targets,
//! so the negation needs no runtime evaluation at all. A `jnz` whose two
//! targets are already the same label never needed a condition at all and
//! is rewritten straight to `jmp`.

use super::Pass;
use crate::analysis::{AnalysesCache, DataFlowGraph};
use crate::errors::VenomResult;
use crate::ir::{Function, Opcode};

pub struct BranchOptimization;

impl Pass for BranchOptimization {
    fn name(&self) -> &'static str {
        "branch_opt"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        let dfg = cache.request::<DataFlowGraph>(func)?;

        let mut unwraps = Vec::new();
        let mut collapses = Vec::new();
        for label in func.block_labels().cloned().collect::<Vec<_>>() {
            let block = func.try_get_block(&label)?;
            let Some(jnz_idx) = block.instructions.iter().position(|i| i.opcode == Opcode::Jnz) else {
                continue;
            };
            let jnz = &block.instructions[jnz_idx];
            if jnz.operands[1].as_label() == jnz.operands[2].as_label() {
                collapses.push((label.clone(), jnz_idx));
                continue;
            }
            let Some(cond) = jnz.operands[0].as_variable() else { continue };
            let Some(producer) = dfg.producer(cond) else { continue };
            let Some(source_inst) = dfg.resolve(func, producer) else { continue };
            if source_inst.opcode != Opcode::IsZero {
                continue;
            }
            let negated = source_inst.operands[0].clone();
            unwraps.push((label.clone(), jnz_idx, negated));
        }

        if unwraps.is_empty() && collapses.is_empty() {
            return Ok(false);
        }

        for (label, idx, negated) in unwraps {
            let block = func.get_block_mut(&label).expect("label exists");
            let jnz = &mut block.instructions[idx];
            jnz.operands[0] = negated;
            jnz.operands.swap(1, 2);
        }
        for (label, idx) in collapses {
            let block = func.get_block_mut(&label).expect("label exists");
            let jnz = &mut block.instructions[idx];
            let target = jnz.operands[1].clone();
            jnz.opcode = Opcode::Jmp;
            jnz.operands = vec![target];
        }
        cache.invalidate_instruction_dependents();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Label, Operand, Variable};
    use alloy_primitives::U256;

    #[test]
    fn unwraps_iszero_and_swaps_targets() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(2u64))],
            Some(Variable::new("sum")),
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::IsZero,
            vec![Operand::from(Variable::new("sum"))],
            Some(Variable::new("cond")),
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::from(Variable::new("cond")),
                Operand::from(Label::new("then")),
                Operand::from(Label::new("els")),
            ],
            None,
        ));
        let mut then = BasicBlock::new(Label::new("then"));
        then.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(then);
        let mut els = BasicBlock::new(Label::new("els"));
        els.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(els);

        let mut cache = AnalysesCache::new();
        let changed = BranchOptimization.run(&mut func, &mut cache).unwrap();
        assert!(changed);

        let jnz = &func.entry().instructions[2];
        assert_eq!(jnz.operands[0].as_variable().unwrap().name(), "sum");
        assert_eq!(jnz.operands[1].as_label().unwrap().name(), "els");
        assert_eq!(jnz.operands[2].as_label().unwrap().name(), "then");
    }

    #[test]
    fn collapses_jnz_with_identical_targets_to_jmp() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("cond"))));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::from(Variable::new("cond")),
                Operand::from(Label::new("join")),
                Operand::from(Label::new("join")),
            ],
            None,
        ));
        let mut join = BasicBlock::new(Label::new("join"));
        join.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(join);

        let mut cache = AnalysesCache::new();
        let changed = BranchOptimization.run(&mut func, &mut cache).unwrap();
        assert!(changed);

        let inst = &func.entry().instructions[1];
        assert_eq!(inst.opcode, Opcode::Jmp);
        assert_eq!(inst.operands.len(), 1);
        assert_eq!(inst.operands[0].as_label().unwrap().name(), "join");
    }
}
