//! Literal codesize reduction (spec §4.9): rewrite a `store` of a literal
//! whose encoding is expensive into a cheaper equivalent instruction.
//!
//! Grounded on `original_source/vyper/venom/passes/literals_codesize.py`
//! and its test fixtures (`test_literals_codesize.py`), which pin the exact
//! thresholds and the resulting operand values:
//! - a literal whose top 9+ bits (from the most significant bit) are all
//!   `1` is cheaper to encode as `not small_value` (`not` costs one byte);
//! - a literal with 24+ trailing zero bits is cheaper to encode as
//!   `shl shift, (value >> shift)` (`shl` costs three bytes).

use super::Pass;
use crate::analysis::AnalysesCache;
use crate::errors::VenomResult;
use crate::ir::{Function, Instruction, Opcode};
use alloy_primitives::U256;

pub struct LiteralCodesizeOptimization;

impl Pass for LiteralCodesizeOptimization {
    fn name(&self) -> &'static str {
        "literal_codesize"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        let mut any_changed = false;
        for label in func.block_labels().cloned().collect::<Vec<_>>() {
            let block = func.get_block_mut(&label).expect("label exists");
            for inst in &mut block.instructions {
                if let Some(rewritten) = rewrite(inst) {
                    *inst = rewritten;
                    any_changed = true;
                }
            }
        }
        if any_changed {
            cache.invalidate_instruction_dependents();
        }
        Ok(any_changed)
    }
}

fn bit_len(v: U256) -> u64 {
    v.bit_len() as u64
}

fn rewrite(inst: &Instruction) -> Option<Instruction> {
    if inst.opcode != Opcode::Store {
        return None;
    }
    let val = inst.operands[0].as_literal()?;
    let output = inst.output.clone();

    if val == U256::MAX {
        return Some(Instruction::new(Opcode::Not, vec![crate::ir::Operand::literal(U256::ZERO)], output));
    }
    if val == U256::ZERO {
        return None;
    }

    let bits = bit_len(val);
    let mask = if bits == 256 { U256::MAX } else { (U256::from(1u64) << bits as usize) - U256::from(1u64) };
    let complement = mask - val;
    if complement != U256::ZERO {
        let leading_ones = bits - bit_len(complement);
        if leading_ones > 8 {
            let new_val = U256::MAX - val;
            return Some(Instruction::new(Opcode::Not, vec![crate::ir::Operand::literal(new_val)], output));
        }
    }

    let trailing_zeros = val.trailing_zeros() as u64;
    let ix = trailing_zeros + 1;
    if ix > 24 {
        let shift = trailing_zeros as usize;
        let shifted = val >> shift;
        return Some(Instruction::new(
            Opcode::Shl,
            vec![crate::ir::Operand::literal(shifted), crate::ir::Operand::literal(U256::from(shift as u64))],
            output,
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, Operand, Variable};

    fn store_of(val: U256) -> Instruction {
        Instruction::new(Opcode::Store, vec![Operand::literal(val)], Some(Variable::new("r")))
    }

    #[test]
    fn all_ones_becomes_not_zero() {
        let inst = store_of(U256::MAX);
        let rewritten = rewrite(&inst).expect("rewrites");
        assert_eq!(rewritten.opcode, Opcode::Not);
        assert_eq!(rewritten.operands[0].as_literal(), Some(U256::ZERO));
    }

    #[test]
    fn long_leading_one_run_becomes_not() {
        let val = ((U256::from(1u64) << 135usize) - U256::from(1u64)) << (256 - 135usize);
        let inst = store_of(val);
        let rewritten = rewrite(&inst).expect("rewrites");
        assert_eq!(rewritten.opcode, Opcode::Not);
        assert_eq!(U256::MAX - rewritten.operands[0].as_literal().unwrap(), val);
    }

    #[test]
    fn many_trailing_zeros_becomes_shl() {
        let val = U256::from(1u64) << 200usize;
        let inst = store_of(val);
        let rewritten = rewrite(&inst).expect("rewrites");
        assert_eq!(rewritten.opcode, Opcode::Shl);
        let shifted = rewritten.operands[0].as_literal().unwrap();
        let shift = rewritten.operands[1].as_literal().unwrap();
        assert_eq!(shifted << shift.to::<usize>(), val);
    }

    #[test]
    fn plain_small_literal_is_untouched() {
        let inst = store_of(U256::from(1u64));
        assert!(rewrite(&inst).is_none());
    }

    #[test]
    fn zero_is_untouched() {
        let inst = store_of(U256::ZERO);
        assert!(rewrite(&inst).is_none());
    }

    #[test]
    fn pass_rewrites_in_place() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(store_of(U256::MAX));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        let mut cache = AnalysesCache::new();
        let changed = LiteralCodesizeOptimization.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        assert_eq!(func.entry().instructions[0].opcode, Opcode::Not);
    }
}
