//! [`BasicBlock`]: a straight-line run of instructions ending in exactly one
//! terminator, plus the CFG edges touching it.

use indexmap::IndexSet;
use rustc_hash::FxHashSet;

use super::instruction::Instruction;
use super::opcode::Opcode;
use super::operand::{Label, Operand, Variable};
use crate::errors::{VenomError, VenomResult};

/// Sort key used by [`BasicBlock::canonicalize_order`]: phis and params
/// first, the terminator last, everything else in between. Stable with
/// respect to relative order within each bucket.
fn sort_key(inst: &Instruction) -> u8 {
    if inst.is_phi() || inst.is_param() {
        0
    } else if inst.is_bb_terminator() {
        2
    } else {
        1
    }
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub label: Label,
    pub instructions: Vec<Instruction>,
    pub cfg_in: IndexSet<Label>,
    pub cfg_out: IndexSet<Label>,
    /// Variables live out of this block, recomputed by
    /// [`crate::analysis::liveness`].
    pub out_vars: FxHashSet<Variable>,
    pub is_reachable: bool,
}

impl BasicBlock {
    pub fn new(label: Label) -> Self {
        BasicBlock {
            label,
            instructions: Vec::new(),
            cfg_in: IndexSet::new(),
            cfg_out: IndexSet::new(),
            out_vars: FxHashSet::default(),
            is_reachable: true,
        }
    }

    pub fn add_cfg_in(&mut self, pred: Label) {
        self.cfg_in.insert(pred);
    }

    pub fn add_cfg_out(&mut self, succ: Label) {
        self.cfg_out.insert(succ);
    }

    pub fn remove_cfg_in(&mut self, pred: &Label) {
        self.cfg_in.shift_remove(pred);
    }

    pub fn remove_cfg_out(&mut self, succ: &Label) {
        self.cfg_out.shift_remove(succ);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(|i| i.is_bb_terminator())
    }

    /// A block with no successors: `stop`/`return`/`revert`/`exit`, as
    /// opposed to `jmp`/`djmp`/`jnz` which still have CFG successors.
    pub fn is_terminal(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| i.is_bb_terminator() && !i.opcode.is_cfg_altering())
    }

    /// Append `inst`, wrapping bare-literal construction the way the
    /// builder's fluent API expects (no raw append past a terminator).
    pub fn append_instruction(&mut self, inst: Instruction) {
        assert!(!self.is_terminated(), "cannot append past a terminator in block {}", self.label);
        self.instructions.push(inst);
    }

    /// Append a multi-output `invoke`: the callee label followed by `k`
    /// argument operands, with `k` being `operands.len()`.
    pub fn append_invoke_instruction(&mut self, callee: Label, operands: Vec<Operand>, output: Option<Variable>) {
        let mut ops = Vec::with_capacity(operands.len() + 1);
        ops.push(Operand::Label(callee));
        ops.extend(operands);
        self.append_instruction(Instruction::new(Opcode::Invoke, ops, output));
    }

    pub fn insert_instruction(&mut self, index: usize, inst: Instruction) {
        self.instructions.insert(index, inst);
    }

    pub fn clear_nops(&mut self) {
        self.instructions.retain(|i| i.opcode != Opcode::Nop);
    }

    pub fn remove_instruction(&mut self, index: usize) {
        self.instructions.remove(index);
    }

    pub fn remove_instructions_after(&mut self, index: usize) {
        self.instructions.truncate(index + 1);
    }

    /// If this block executes an unconditional `revert`, anything past it
    /// is dead. Truncate there and append a synthetic `stop` so the block
    /// still ends in a terminator after the revert instruction itself is
    /// later folded away by an optimization pass.
    pub fn truncate_after_revert(&mut self) {
        if let Some(idx) = self.instructions.iter().position(|i| i.opcode == Opcode::Revert) {
            self.instructions.truncate(idx + 1);
            self.instructions.push(Instruction::new(Opcode::Stop, Vec::new(), None));
        }
    }

    /// Re-sort instructions into phi/param, body, terminator order and
    /// verify exactly one terminator sits at the end. Called after any
    /// transformation that may have disturbed ordering (e.g. phi
    /// insertion during SSA construction).
    pub fn canonicalize_order(&mut self) -> VenomResult<()> {
        self.instructions.sort_by_key(sort_key);
        let terminators = self.instructions.iter().filter(|i| i.is_bb_terminator()).count();
        if terminators != 1 {
            return Err(VenomError::panic(
                format!("block {} has {terminators} terminators, expected exactly one", self.label),
                self.label.to_string(),
            ));
        }
        Ok(())
    }

    pub fn phi_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|i| i.is_phi())
    }

    pub fn phi_instructions_mut(&mut self) -> impl Iterator<Item = &mut Instruction> + '_ {
        self.instructions.iter_mut().filter(|i| i.is_phi())
    }

    pub fn non_phi_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|i| !i.is_phi())
    }

    pub fn param_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|i| i.is_param())
    }

    pub fn pseudo_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|i| i.is_pseudo())
    }

    /// Everything but leading phi/param pseudo-instructions and the
    /// trailing terminator.
    pub fn body_instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter().filter(|i| !i.is_pseudo() && !i.is_bb_terminator())
    }

    pub fn replace_operands(&mut self, old: &Variable, new: &Operand) {
        for inst in &mut self.instructions {
            for op in &mut inst.operands {
                if op.as_variable() == Some(old) {
                    *op = new.clone();
                }
            }
        }
    }

    /// Drop phi operands whose predecessor label is no longer a live CFG
    /// edge into this block, then collapse degenerate phis: a two-operand
    /// phi becomes a plain `store` of its one remaining value, a
    /// zero-operand phi becomes `nop`.
    pub fn fix_phi_instructions(&mut self) {
        let live_preds = self.cfg_in.clone();
        let mut changed = false;
        for inst in self.phi_instructions_mut() {
            let stale: Vec<Label> = inst
                .phi_operands()
                .filter(|(pred, _)| !live_preds.contains(*pred))
                .map(|(pred, _)| pred.clone())
                .collect();
            for pred in stale {
                inst.remove_phi_operand(&pred);
                changed = true;
            }
        }
        if changed {
            for inst in self.phi_instructions_mut() {
                match inst.operands.len() {
                    0 => inst.make_nop(),
                    2 => {
                        let value = inst.operands[1].clone();
                        let out = inst.output.clone();
                        *inst = Instruction::new(Opcode::Store, vec![value], out);
                    }
                    _ => {}
                }
            }
        }
    }

    pub fn get_assignments(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.instructions.iter().filter_map(|i| i.output.as_ref())
    }

    pub fn get_uses(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.instructions.iter().flat_map(|i| i.input_variables())
    }

    /// Variables live at block entry: phi/param outputs aside, every
    /// variable consumed before it is locally redefined.
    pub fn liveness_in_vars(&self) -> FxHashSet<Variable> {
        let mut live = self.out_vars.clone();
        for inst in self.instructions.iter().rev() {
            if let Some(out) = &inst.output {
                live.remove(out);
            }
            if inst.is_phi() {
                continue;
            }
            for v in inst.input_variables() {
                live.insert(v.clone());
            }
        }
        live
    }

    /// Deep copy with every block label and variable renamed through the
    /// supplied closures, used when duplicating a function body.
    pub fn copy_with(
        &self,
        rename_label: impl Fn(&Label) -> Label,
        rename_var: impl Fn(&Variable) -> Variable,
    ) -> BasicBlock {
        BasicBlock {
            label: rename_label(&self.label),
            instructions: self.instructions.iter().map(|i| i.copy_with(&rename_var)).collect(),
            cfg_in: self.cfg_in.iter().map(&rename_label).collect(),
            cfg_out: self.cfg_out.iter().map(&rename_label).collect(),
            out_vars: self.out_vars.iter().map(&rename_var).collect(),
            is_reachable: self.is_reachable,
        }
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for inst in &self.instructions {
            writeln!(f, "    {inst}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_after_revert_appends_stop() {
        let mut bb = BasicBlock::new(Label::new("bb0"));
        bb.append_instruction(Instruction::new(Opcode::Revert, vec![], None));
        bb.append_instruction(Instruction::new(Opcode::Add, vec![], Some(Variable::new("dead"))));
        bb.instructions.push(Instruction::new(Opcode::Stop, vec![], None));
        bb.truncate_after_revert();
        assert_eq!(bb.instructions.len(), 2);
        assert_eq!(bb.instructions[1].opcode, Opcode::Stop);
    }

    #[test]
    fn fix_phi_drops_stale_predecessor_and_collapses() {
        let mut bb = BasicBlock::new(Label::new("bb1"));
        bb.add_cfg_in(Label::new("bb0"));
        bb.append_instruction(Instruction::new(
            Opcode::Phi,
            vec![
                Operand::from(Label::new("bb0")),
                Operand::from(Variable::new("x")),
                Operand::from(Label::new("dead_pred")),
                Operand::from(Variable::new("y")),
            ],
            Some(Variable::new("z")),
        ));
        bb.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        bb.fix_phi_instructions();
        assert_eq!(bb.instructions[0].opcode, Opcode::Store);
    }

    #[test]
    fn canonicalize_order_moves_phi_first_and_terminator_last() {
        let mut bb = BasicBlock::new(Label::new("bb0"));
        bb.instructions.push(Instruction::new(Opcode::Stop, vec![], None));
        bb.instructions.push(Instruction::new(Opcode::Add, vec![], Some(Variable::new("a"))));
        bb.instructions.push(Instruction::new(Opcode::Phi, vec![], Some(Variable::new("p"))));
        bb.canonicalize_order().unwrap();
        assert!(bb.instructions[0].is_phi());
        assert!(bb.instructions.last().unwrap().is_bb_terminator());
    }
}
