//! The IR builder (spec §4.1): a thin, stateful API for constructing
//! Venom IR — used directly by front ends and throughout this crate's own
//! tests in place of hand-written `Instruction`/`BasicBlock` literals.

use crate::errors::{VenomError, VenomResult};
use crate::ir::{BasicBlock, Function, Instruction, Label, Opcode, Operand, Variable};

/// Appends instructions to one "current" block of `func` at a time.
/// Creating a block (via [`Builder::create_block`]) does not make it part
/// of the function; [`Builder::append_block`] does that separately, so
/// callers can wire up a block's contents before deciding where — or
/// whether — it lives in the final CFG.
pub struct Builder<'f> {
    func: &'f mut Function,
    current: Label,
}

impl<'f> Builder<'f> {
    /// Start building at `func`'s entry block.
    pub fn new(func: &'f mut Function) -> Self {
        let current = func.entry_label().clone();
        Builder { func, current }
    }

    pub fn func(&self) -> &Function {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut Function {
        self.func
    }

    /// Mint a fresh, not-yet-attached block label. Pair with
    /// [`Builder::append_block`] once its contents are ready.
    pub fn create_block(&mut self, suffix: &str) -> Label {
        self.func.next_label(suffix)
    }

    /// Attach an empty block under `label` to the function without
    /// switching the builder's cursor to it.
    pub fn append_block(&mut self, label: Label) {
        self.func.add_block(BasicBlock::new(label));
    }

    pub fn switch_to_block(&mut self, label: Label) {
        self.current = label;
    }

    pub fn current_block(&self) -> &Label {
        &self.current
    }

    fn current_block_mut(&mut self) -> &mut BasicBlock {
        self.func.get_block_mut(&self.current).expect("builder cursor always points at a live block")
    }

    /// Append an instruction producing one output (or none, for
    /// `NO_OUTPUT` opcodes), wrapping bare operands via `Into<Operand>` so
    /// callers can pass raw `u64`s directly.
    pub fn emit<O: Into<Operand>>(&mut self, opcode: Opcode, operands: Vec<O>) -> VenomResult<Option<Variable>> {
        if opcode.is_pseudo() {
            return Err(VenomError::panic(
                format!("use a dedicated builder method for pseudo-opcode {opcode}"),
                self.current.to_string(),
            ));
        }
        let operands: Vec<Operand> = operands.into_iter().map(Into::into).collect();
        let output = if opcode.has_no_output() { None } else { Some(self.func.next_variable()) };
        let inst = Instruction::new(opcode, operands, output.clone());
        self.current_block_mut().append_instruction(inst);
        Ok(output)
    }

    pub fn param(&mut self) -> Variable {
        let v = self.func.next_variable();
        let inst = Instruction::new(Opcode::Param, vec![], Some(v.clone()));
        self.current_block_mut().append_instruction(inst);
        v
    }

    /// `invoke` with `returns` output variables. The data model allows at
    /// most one output per instruction, so `returns` may only be 0 or 1.
    pub fn invoke(&mut self, callee: Label, args: Vec<Operand>, returns: usize) -> VenomResult<Vec<Variable>> {
        if returns > 1 {
            return Err(VenomError::panic(
                "invoke requesting more than one return value is not representable: \
                 an instruction produces at most one output variable"
                    .to_string(),
                callee.to_string(),
            ));
        }
        let output = if returns == 1 { Some(self.func.next_variable()) } else { None };
        self.current_block_mut().append_invoke_instruction(callee, args, output.clone());
        Ok(output.into_iter().collect())
    }

    pub fn jmp(&mut self, target: Label) {
        self.current_block_mut()
            .append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(target)], None));
    }

    pub fn jnz(&mut self, cond: Operand, if_true: Label, if_false: Label) {
        self.current_block_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![cond, Operand::from(if_true), Operand::from(if_false)],
            None,
        ));
    }

    pub fn ret(&mut self, values: Vec<Operand>) {
        self.current_block_mut().append_instruction(Instruction::new(Opcode::Ret, values, None));
    }

    pub fn stop(&mut self) {
        self.current_block_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
    }

    pub fn revert(&mut self, offset: Operand, size: Operand) {
        self.current_block_mut()
            .append_instruction(Instruction::new(Opcode::Revert, vec![offset, size], None));
    }

    /// Append an empty `phi` with one placeholder slot per current
    /// predecessor; callers typically use [`crate::ssa::make_ssa`] instead
    /// of constructing phis by hand.
    pub fn phi(&mut self, incoming: Vec<(Label, Operand)>) -> Variable {
        let out = self.func.next_variable();
        let mut operands = Vec::with_capacity(incoming.len() * 2);
        for (pred, value) in incoming {
            operands.push(Operand::from(pred));
            operands.push(value);
        }
        let inst = Instruction::new(Opcode::Phi, operands, Some(out.clone()));
        self.current_block_mut().append_instruction(inst);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn cannot_append_past_a_terminator() {
        let mut func = Function::new(Label::new("f"));
        let mut b = Builder::new(&mut func);
        b.stop();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            b.emit(Opcode::Add, vec![Operand::literal(U256::from(1u64))]).unwrap();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn invoke_rejects_multi_return() {
        let mut func = Function::new(Label::new("f"));
        let mut b = Builder::new(&mut func);
        let result = b.invoke(Label::new("callee"), vec![], 2);
        assert!(result.is_err());
    }

    #[test]
    fn create_block_does_not_attach_until_appended() {
        let mut func = Function::new(Label::new("f"));
        let label = {
            let mut b = Builder::new(&mut func);
            b.create_block("bb")
        };
        assert!(func.get_block(&label).is_none());
        func.add_block(BasicBlock::new(label.clone()));
        assert!(func.get_block(&label).is_some());
    }
}
