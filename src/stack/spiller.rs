//! Stack spiller (spec §4.11): bridges SSA values and the stack machine's
//! 16-deep addressability. Swaps/dups whose target is out of native reach
//! spill the intervening segment to scratch memory and restore it in the
//! rearranged order; `reorder` plans a minimum-cost sequence of dups,
//! swaps, pops and spills/reloads to put a desired set of operands on top.
//!
//! Grounded on `original_source/vyper/venom/stack_spiller.py`. One
//! constant isn't recoverable from the retrieved sources (`MemoryPositions
//! .STACK_SPILL_BASE`, the fixed front-end memory layout) — this core
//! instead takes the spill region base from [`crate::config::TargetConfig`],
//! which already exists for exactly this purpose.

use rustc_hash::FxHashMap;

use crate::analysis::DataFlowGraph;
use crate::config::TargetConfig;
use crate::errors::{VenomError, VenomResult};
use crate::ir::{Function, Instruction, Label, Opcode, Operand, Variable};

use super::model::StackModel;

pub struct StackSpiller {
    config: TargetConfig,
    free_slots: Vec<u32>,
    next_offset: u32,
    next_alloca_id: u64,
    /// Index in the entry block's instruction list where the next
    /// synthesized `alloca` is inserted (kept just after the `param`s).
    insert_index: usize,
    spilled: FxHashMap<Operand, u32>,
}

impl StackSpiller {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            free_slots: Vec::new(),
            next_offset: config.spill_region_base,
            next_alloca_id: 0,
            insert_index: 0,
            spilled: FxHashMap::default(),
        }
    }

    /// Must be called once per function before any swap/dup/reorder, so
    /// synthesized `alloca`s land right after the entry block's `param`s.
    pub fn begin_function(&mut self, func: &Function) {
        self.insert_index = func.entry().param_instructions().count();
        self.free_slots.clear();
        self.spilled.clear();
    }

    fn acquire_offset(&mut self, func: &mut Function) -> u32 {
        if let Some(offset) = self.free_slots.pop() {
            return offset;
        }
        let offset = self.next_offset;
        self.next_offset += self.config.spill_slot_size;

        let output = func.next_variable();
        let inst = Instruction::new(
            Opcode::Alloca,
            vec![
                Operand::literal(alloy_primitives::U256::from(offset)),
                Operand::literal(alloy_primitives::U256::from(self.config.spill_slot_size)),
                Operand::literal(alloy_primitives::U256::from(self.next_alloca_id)),
            ],
            Some(output),
        );
        self.next_alloca_id += 1;
        func.entry_mut().insert_instruction(self.insert_index, inst);
        self.insert_index += 1;
        offset
    }

    fn restore(&mut self, stack: &mut StackModel, assembly: &mut Vec<Asm>, op: Operand, offset: u32) {
        self.free_slots.push(offset);
        assembly.push(Asm::Push(alloy_primitives::U256::from(offset)));
        assembly.push(Asm::Mnemonic("MLOAD"));
        stack.push(op);
    }

    /// Release memory slots whose operand is no longer live.
    pub fn release_dead(&mut self, live: &rustc_hash::FxHashSet<Variable>) {
        let dead: Vec<Operand> = self
            .spilled
            .keys()
            .filter(|op| match op.as_variable() {
                Some(v) => !live.contains(v),
                None => true,
            })
            .cloned()
            .collect();
        for op in dead {
            if let Some(offset) = self.spilled.remove(&op) {
                self.free_slots.push(offset);
            }
        }
    }

    /// Swap the top of the stack with the operand at `depth` (`depth < 0`).
    pub fn swap(&mut self, func: &mut Function, stack: &mut StackModel, depth: i64, assembly: &mut Vec<Asm>) -> VenomResult<()> {
        if depth == 0 {
            return Ok(());
        }
        let swap_idx = -depth;
        if swap_idx < 1 {
            return Err(VenomError::stack_too_deep("swap depth below 0", swap_idx));
        }
        if swap_idx <= self.config.stack_limit as i64 {
            stack.swap(depth);
            assembly.push(Asm::Swap(swap_idx as u8));
            return Ok(());
        }

        let chunk_size = (swap_idx + 1) as usize;
        let (spill_ops, offsets) = self.spill_segment(func, stack, chunk_size, assembly);

        let mut desired: Vec<usize> = (0..chunk_size).collect();
        if chunk_size > 1 {
            desired.swap(0, chunk_size - 1);
        }
        self.restore_segment(stack, assembly, &spill_ops, &offsets, &desired);
        Ok(())
    }

    /// Duplicate the operand at `depth` (`depth <= 0`) onto the top.
    pub fn dup(&mut self, func: &mut Function, stack: &mut StackModel, depth: i64, assembly: &mut Vec<Asm>) -> VenomResult<()> {
        let dup_idx = 1 - depth;
        if dup_idx < 1 {
            return Err(VenomError::stack_too_deep("dup depth below 0", dup_idx));
        }
        if dup_idx <= self.config.stack_limit as i64 {
            stack.dup(depth);
            assembly.push(Asm::Dup(dup_idx as u8));
            return Ok(());
        }

        let chunk_size = dup_idx as usize;
        let (spill_ops, offsets) = self.spill_segment(func, stack, chunk_size, assembly);

        let mut desired: Vec<usize> = vec![chunk_size - 1];
        desired.extend(0..chunk_size);
        self.restore_segment(stack, assembly, &spill_ops, &offsets, &desired);
        Ok(())
    }

    fn spill_segment(
        &mut self,
        func: &mut Function,
        stack: &mut StackModel,
        count: usize,
        assembly: &mut Vec<Asm>,
    ) -> (Vec<Operand>, Vec<u32>) {
        let mut ops = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let op = stack.peek(0).clone();
            ops.push(op);
            let offset = self.acquire_offset(func);
            assembly.push(Asm::Push(alloy_primitives::U256::from(offset)));
            assembly.push(Asm::Mnemonic("MSTORE"));
            stack.pop(1);
            offsets.push(offset);
        }
        (ops, offsets)
    }

    fn restore_segment(&mut self, stack: &mut StackModel, assembly: &mut Vec<Asm>, ops: &[Operand], offsets: &[u32], desired: &[usize]) {
        for &idx in desired.iter().rev() {
            assembly.push(Asm::Push(alloy_primitives::U256::from(offsets[idx])));
            assembly.push(Asm::Mnemonic("MLOAD"));
            stack.push(ops[idx].clone());
        }
        for &offset in offsets {
            self.free_slots.push(offset);
        }
    }

    /// Bring `wanted` (bottom-to-top desired order for the next
    /// instruction's operands) to the top of the stack, preferring
    /// equivalent operands already present and popping dead ones.
    pub fn reorder(
        &mut self,
        func: &mut Function,
        stack: &mut StackModel,
        dfg: &DataFlowGraph,
        wanted: &[Operand],
        assembly: &mut Vec<Asm>,
    ) -> VenomResult<()> {
        for (slot_from_top, target) in wanted.iter().rev().enumerate() {
            let depth = -(slot_from_top as i64);
            if let Some(found) = find_equivalent_depth(stack, dfg, target) {
                if found == depth {
                    continue;
                }
                self.dup(func, stack, found, assembly)?;
                self.swap(func, stack, depth - 1, assembly)?;
                stack.pop(1);
            } else if let Some(&offset) = self.spilled.get(target) {
                self.restore(stack, assembly, target.clone(), offset);
                if depth != 0 {
                    self.swap(func, stack, depth - 1, assembly)?;
                    stack.pop(1);
                }
            } else {
                // Not a known variable producer's slot and not spilled: a
                // literal or label is always producible from nothing by
                // pushing it fresh. A variable in this state means its
                // producer never ran, which is a real scheduling bug.
                match target {
                    Operand::Literal(v) => assembly.push(Asm::Push(*v)),
                    Operand::Label(l) => assembly.push(Asm::PushLabel(l.clone())),
                    Operand::Variable(_) => {
                        return Err(VenomError::panic("operand not available for scheduling", target.to_string()));
                    }
                }
                stack.push(target.clone());
                if depth != 0 {
                    self.swap(func, stack, depth - 1, assembly)?;
                    stack.pop(1);
                }
            }
        }
        Ok(())
    }
}

fn find_equivalent_depth(stack: &StackModel, dfg: &DataFlowGraph, target: &Operand) -> Option<i64> {
    if let Some(depth) = stack.get_depth(target) {
        return Some(depth);
    }
    let target_var = target.as_variable()?;
    for (i, op) in stack.as_slice().iter().rev().enumerate() {
        if let Some(v) = op.as_variable() {
            if dfg.are_equivalent(v, target_var) {
                return Some(-(i as i64));
            }
        }
    }
    None
}

/// One emitted assembly element (spec §6's "opcode mnemonic, integer
/// immediate, or Label marker" list, typed instead of stringly).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Asm {
    Mnemonic(&'static str),
    Push(alloy_primitives::U256),
    /// Push a jump target / callee as an immediate, distinct from
    /// [`Asm::Label`] which marks a `JUMPDEST` position rather than
    /// pushing one.
    PushLabel(Label),
    Swap(u8),
    Dup(u8),
    Label(Label),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysesCache;

    #[test]
    fn native_swap_within_reach() {
        let mut func = Function::new(Label::new("f"));
        let mut spiller = StackSpiller::new(TargetConfig::default());
        spiller.begin_function(&func);
        let mut stack = StackModel::new();
        stack.push(Operand::from(Variable::new("a")));
        stack.push(Operand::from(Variable::new("b")));
        let mut asm = Vec::new();
        spiller.swap(&mut func, &mut stack, -1, &mut asm).unwrap();
        assert_eq!(asm, vec![Asm::Swap(1)]);
    }

    #[test]
    fn deep_swap_spills_and_synthesizes_alloca() {
        let mut func = Function::new(Label::new("f"));
        let mut spiller = StackSpiller::new(TargetConfig::default());
        spiller.begin_function(&func);
        let mut stack = StackModel::new();
        for i in 0..18 {
            stack.push(Operand::from(Variable::new(format!("v{i}"))));
        }
        let mut asm = Vec::new();
        spiller.swap(&mut func, &mut stack, -17, &mut asm).unwrap();
        assert_eq!(stack.height(), 18);
        assert!(func.entry().instructions.iter().any(|i| i.opcode == Opcode::Alloca));
    }

    #[test]
    fn dup_too_deep_reports_stack_too_deep() {
        let mut func = Function::new(Label::new("f"));
        let mut spiller = StackSpiller::new(TargetConfig::default());
        spiller.begin_function(&func);
        let mut stack = StackModel::new();
        stack.push(Operand::from(Variable::new("a")));
        let mut asm = Vec::new();
        let err = spiller.dup(&mut func, &mut stack, 5, &mut asm);
        assert!(err.is_err());
    }

    #[test]
    fn reorder_reuses_equivalent_variable() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("a"))));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Store,
            vec![Operand::from(Variable::new("a"))],
            Some(Variable::new("b")),
        ));
        let mut cache = AnalysesCache::new();
        let dfg = cache.request::<DataFlowGraph>(&mut func).unwrap();

        let mut spiller = StackSpiller::new(TargetConfig::default());
        spiller.begin_function(&func);
        let mut stack = StackModel::new();
        stack.push(Operand::from(Variable::new("a")));
        let mut asm = Vec::new();
        spiller.reorder(&mut func, &mut stack, dfg, &[Operand::from(Variable::new("b"))], &mut asm).unwrap();
        assert_eq!(stack.peek(0), &Operand::from(Variable::new("a")));
    }
}
