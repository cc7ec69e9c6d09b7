//! Liveness (spec §4.5): a per-block fixed point over the reverse CFG,
//! projecting phi contributions onto the specific predecessor edge they
//! came in on.

use rustc_hash::FxHashSet;

use super::{cfg, Analysis};
use crate::errors::VenomResult;
use crate::ir::{Function, Label, Variable};

/// Marker analysis: its value carries nothing (liveness lives on the
/// blocks/instructions themselves, via `out_vars`/`liveness`), but
/// requesting it through the cache guarantees those fields are current.
pub struct LivenessAnalysis;

impl Analysis for LivenessAnalysis {
    fn analyze(func: &mut Function) -> VenomResult<Self> {
        cfg::calculate_cfg(func)?;
        let labels: Vec<Label> = func.block_labels().cloned().collect();

        for label in &labels {
            func.get_block_mut(label).unwrap().out_vars.clear();
        }

        let mut changed = true;
        while changed {
            changed = false;
            for label in &labels {
                let succs: Vec<Label> = func.try_get_block(label)?.cfg_out.iter().cloned().collect();
                let mut new_out: FxHashSet<Variable> = FxHashSet::default();
                for succ in &succs {
                    let succ_block = func.try_get_block(succ)?;
                    for phi in succ_block.phi_instructions() {
                        for (pred, value) in phi.phi_operands() {
                            if pred == label {
                                if let Some(v) = value.as_variable() {
                                    new_out.insert(v.clone());
                                }
                            }
                        }
                    }
                    new_out.extend(succ_block.liveness_in_vars());
                }
                let block = func.get_block_mut(label).unwrap();
                if block.out_vars != new_out {
                    block.out_vars = new_out;
                    changed = true;
                }
            }
        }

        for label in &labels {
            let block = func.get_block_mut(label).unwrap();
            let mut live = block.out_vars.clone();
            for inst in block.instructions.iter_mut().rev() {
                inst.liveness = live.clone();
                if let Some(out) = &inst.output {
                    live.remove(out);
                }
                if !inst.is_phi() {
                    for v in inst.input_variables() {
                        live.insert(v.clone());
                    }
                }
            }
        }

        Ok(LivenessAnalysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Opcode, Operand};

    #[test]
    fn variable_dead_after_last_use() {
        let mut func = Function::new(Label::new("f"));
        let x = Variable::new("x");
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(x.clone())));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::from(x.clone()), Operand::literal(alloy_primitives::U256::from(1u64))],
            Some(Variable::new("y")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        LivenessAnalysis::analyze(&mut func).unwrap();
        assert!(func.entry().out_vars.is_empty());
        // `x` is live before the add (it's consumed there), not after.
        assert!(func.entry().instructions[1].liveness.contains(&x));
        assert!(!func.entry().instructions[2].liveness.contains(&x));
    }

    #[test]
    fn phi_contribution_scoped_to_its_predecessor() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::literal(alloy_primitives::U256::from(1u64)),
                Operand::from(Label::new("left")),
                Operand::from(Label::new("right")),
            ],
            None,
        ));

        let mut left = BasicBlock::new(Label::new("left"));
        left.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(left);

        let mut right = BasicBlock::new(Label::new("right"));
        right.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(right);

        let mut join = BasicBlock::new(Label::new("join"));
        join.append_instruction(Instruction::new(
            Opcode::Phi,
            vec![
                Operand::from(Label::new("left")),
                Operand::from(Variable::new("a")),
                Operand::from(Label::new("right")),
                Operand::from(Variable::new("b")),
            ],
            Some(Variable::new("c")),
        ));
        join.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(join);

        LivenessAnalysis::analyze(&mut func).unwrap();
        let left_out = &func.get_block(&Label::new("left")).unwrap().out_vars;
        let right_out = &func.get_block(&Label::new("right")).unwrap().out_vars;
        assert!(left_out.contains(&Variable::new("a")));
        assert!(!left_out.contains(&Variable::new("b")));
        assert!(right_out.contains(&Variable::new("b")));
        assert!(!right_out.contains(&Variable::new("a")));
    }
}
