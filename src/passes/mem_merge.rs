//! Memory merge (spec §4.9 "Memory merge"): coalesce adjacent word-aligned
//! `mstore`s and `mcopy`/`calldatacopy` sequences into single larger copies
//! when alignment, contiguity, and alias constraints permit.
//!
//! Two shapes are recognized within a single block, both requiring
//! literal, exactly-contiguous addresses with nothing else interleaved:
//! - two adjacent copies of the same opcode (`mcopy`/`mcopy` or
//!   `calldatacopy`/`calldatacopy`) whose second destination/source
//!   immediately continue the first's, merged into one wider copy;
//! - an `mload src; mstore dst, %v` idiom (a one-word manual copy) whose
//!   loaded value is used only by that store, repeated contiguously,
//!   collapsed into a single `mcopy`.
//!
//! Operand order follows the EVM stack-pop order for these three-argument
//! opcodes (`destOffset, offset, size`, top of stack first), reversed by
//! the same internal-storage convention `mstore` uses: `operands == [size,
//! src, dst]`.

use super::Pass;
use crate::analysis::{AnalysesCache, DataFlowGraph};
use crate::errors::VenomResult;
use crate::ir::{Function, Instruction, Label, Opcode, Operand};
use alloy_primitives::U256;

pub struct MemMerge;

impl Pass for MemMerge {
    fn name(&self) -> &'static str {
        "mem_merge"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        let mut any_changed = false;
        for label in func.block_labels().cloned().collect::<Vec<_>>() {
            if merge_copies(func, &label)? {
                any_changed = true;
            }
        }
        if any_changed {
            let dfg = cache.request::<DataFlowGraph>(func)?;
            any_changed |= merge_load_store_idiom(func, dfg)?;
            cache.invalidate_instruction_dependents();
        } else {
            let dfg = cache.request::<DataFlowGraph>(func)?;
            if merge_load_store_idiom(func, dfg)? {
                any_changed = true;
                cache.invalidate_instruction_dependents();
            }
        }
        Ok(any_changed)
    }
}

fn copy_fields(inst: &Instruction) -> Option<(U256, U256, U256)> {
    let len = inst.operands[0].as_literal()?;
    let src = inst.operands[1].as_literal()?;
    let dst = inst.operands[2].as_literal()?;
    Some((len, src, dst))
}

/// Merge runs of adjacent identical-opcode `mcopy`/`calldatacopy`
/// instructions whose ranges chain exactly.
fn merge_copies(func: &mut Function, label: &Label) -> VenomResult<bool> {
    let mut changed = false;
    loop {
        let block = func.try_get_block(label)?;
        let mut merge_at = None;
        for idx in 0..block.instructions.len().saturating_sub(1) {
            let a = &block.instructions[idx];
            let b = &block.instructions[idx + 1];
            if !matches!(a.opcode, Opcode::MCopy | Opcode::CallDataCopy) || a.opcode != b.opcode {
                continue;
            }
            let (Some((len_a, src_a, dst_a)), Some((len_b, src_b, dst_b))) = (copy_fields(a), copy_fields(b)) else {
                continue;
            };
            if src_a + len_a == src_b && dst_a + len_a == dst_b {
                merge_at = Some((idx, len_a + len_b, src_a, dst_a));
                break;
            }
        }
        let Some((idx, total_len, src, dst)) = merge_at else { break };
        let block = func.get_block_mut(label).expect("label exists");
        let opcode = block.instructions[idx].opcode;
        block.instructions[idx] = Instruction::new(
            opcode,
            vec![Operand::literal(total_len), Operand::literal(src), Operand::literal(dst)],
            None,
        );
        block.instructions.remove(idx + 1);
        changed = true;
    }
    Ok(changed)
}

/// Collapse a contiguous `mload src; mstore dst, %v` run (`%v` used only
/// by its own store) into a single `mcopy`.
fn merge_load_store_idiom(func: &mut Function, dfg: &DataFlowGraph) -> VenomResult<bool> {
    let mut changed = false;
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        loop {
            let block = func.try_get_block(&label)?;
            let mut run_start = None;
            'search: for idx in 0..block.instructions.len() {
                if block.instructions[idx].opcode != Opcode::MLoad {
                    continue;
                }
                let Some(mut src) = block.instructions[idx].operands[0].as_literal() else { continue };
                let mut count = 0u64;
                let mut cursor = idx;
                let mut dst = None;
                loop {
                    let Some(load) = block.instructions.get(cursor) else { break };
                    if load.opcode != Opcode::MLoad {
                        break;
                    }
                    let Some(load_src) = load.operands[0].as_literal() else { break };
                    if count > 0 && load_src != src {
                        break;
                    }
                    let Some(store) = block.instructions.get(cursor + 1) else { break };
                    if store.opcode != Opcode::MStore {
                        break;
                    }
                    let Some(store_val) = store.operands[0].as_variable() else { break };
                    let Some(load_out) = &load.output else { break };
                    if store_val != load_out {
                        break;
                    }
                    if dfg.uses(load_out).len() != 1 {
                        break;
                    }
                    let Some(store_dst) = store.operands[1].as_literal() else { break };
                    if count == 0 {
                        dst = Some(store_dst);
                    } else if Some(store_dst) != dst.map(|d| d + U256::from(32u64 * count)) {
                        break;
                    }
                    count += 1;
                    src += U256::from(32u64);
                    cursor += 2;
                }
                if count >= 2 {
                    run_start = Some((idx, count, block.instructions[idx].operands[0].as_literal().unwrap(), dst.unwrap()));
                    break 'search;
                }
            }
            let Some((idx, count, src0, dst0)) = run_start else { break };
            let block = func.get_block_mut(&label).expect("label exists");
            let total_len = U256::from(32u64 * count);
            block.instructions[idx] = Instruction::new(
                Opcode::MCopy,
                vec![Operand::literal(total_len), Operand::literal(src0), Operand::literal(dst0)],
                None,
            );
            block.instructions.drain(idx + 1..idx + 1 + (count as usize) * 2 - 1);
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Variable;

    #[test]
    fn adjacent_mcopy_merges_into_one() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MCopy,
            vec![Operand::literal(U256::from(32u64)), Operand::literal(U256::from(0u64)), Operand::literal(U256::from(100u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MCopy,
            vec![Operand::literal(U256::from(32u64)), Operand::literal(U256::from(32u64)), Operand::literal(U256::from(132u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = MemMerge.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        assert_eq!(func.entry().instructions.len(), 2);
        let merged = &func.entry().instructions[0];
        assert_eq!(merged.operands[0].as_literal(), Some(U256::from(64u64)));
        assert_eq!(merged.operands[1].as_literal(), Some(U256::from(0u64)));
        assert_eq!(merged.operands[2].as_literal(), Some(U256::from(100u64)));
    }

    #[test]
    fn load_store_copy_idiom_collapses_to_mcopy() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MLoad,
            vec![Operand::literal(U256::from(0u64))],
            Some(Variable::new("v0")),
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::from(Variable::new("v0")), Operand::literal(U256::from(100u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MLoad,
            vec![Operand::literal(U256::from(32u64))],
            Some(Variable::new("v1")),
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::MStore,
            vec![Operand::from(Variable::new("v1")), Operand::literal(U256::from(132u64))],
            None,
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let mut cache = AnalysesCache::new();
        let changed = MemMerge.run(&mut func, &mut cache).unwrap();
        assert!(changed);
        assert_eq!(func.entry().instructions.len(), 2);
        let merged = &func.entry().instructions[0];
        assert_eq!(merged.opcode, Opcode::MCopy);
        assert_eq!(merged.operands[0].as_literal(), Some(U256::from(64u64)));
    }
}
