//! [`Instruction`]: one IR instruction inside a [`BasicBlock`](super::basic_block::BasicBlock).

use std::fmt;

use rustc_hash::FxHashSet;

use super::opcode::Opcode;
use super::operand::{Label, Operand, Variable};

/// One instruction. Mirrors `IRInstruction` from the basic-block module this
/// is grounded on: opcode, positional operands, an optional SSA output, and
/// a grab-bag of bookkeeping (liveness, annotation, source backref) that
/// never affects codegen semantics directly but is threaded through passes
/// for diagnostics.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub output: Option<Variable>,
    /// Variables live immediately before this instruction executes. Filled
    /// in by [`crate::analysis::liveness`]; empty until then.
    pub liveness: FxHashSet<Variable>,
    /// Free-form debug annotation (e.g. a source snippet), printed as a
    /// trailing comment by [`crate::printer`].
    pub annotation: Option<String>,
    /// Line number in whatever source produced this instruction, if known.
    pub ast_source: Option<usize>,
    /// Set by a pass that proved this instruction would trap or revert
    /// unconditionally, so the driver can surface it as a diagnostic.
    pub error_msg: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, output: Option<Variable>) -> Self {
        Instruction {
            opcode,
            operands,
            output,
            liveness: FxHashSet::default(),
            annotation: None,
            ast_source: None,
            error_msg: None,
        }
    }

    pub fn is_volatile(&self) -> bool {
        self.opcode.is_volatile()
    }

    pub fn is_commutative(&self) -> bool {
        self.opcode.is_commutative()
    }

    pub fn is_comparator(&self) -> bool {
        self.opcode.is_comparator()
    }

    pub fn is_bb_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::Phi
    }

    pub fn is_param(&self) -> bool {
        self.opcode == Opcode::Param
    }

    pub fn is_pseudo(&self) -> bool {
        self.opcode.is_pseudo()
    }

    /// Turn this instruction into a no-op in place, preserving its position
    /// (used instead of removing it mid-iteration).
    pub fn make_nop(&mut self) {
        self.opcode = Opcode::Nop;
        self.operands.clear();
        self.output = None;
    }

    /// All label operands (jump targets, callees).
    pub fn label_operands(&self) -> impl Iterator<Item = &Label> + '_ {
        self.operands.iter().filter_map(Operand::as_label)
    }

    pub fn non_label_operands(&self) -> impl Iterator<Item = &Operand> + '_ {
        self.operands.iter().filter(|op| !op.is_label())
    }

    /// Operand positions that are variables, i.e. this instruction's uses.
    pub fn input_variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.operands.iter().filter_map(Operand::as_variable)
    }

    /// `(predecessor_label, value)` pairs of a `phi`. Phi operands are
    /// stored as `[label0, value0, label1, value1, ...]`.
    pub fn phi_operands(&self) -> impl Iterator<Item = (&Label, &Operand)> + '_ {
        assert!(self.is_phi(), "phi_operands called on non-phi instruction");
        self.operands.chunks_exact(2).map(|pair| {
            let label = pair[0].as_label().expect("phi operand 0 must be a label");
            (label, &pair[1])
        })
    }

    /// Drop the incoming value from `pred`, if present. Used when a
    /// predecessor edge is removed from the CFG.
    pub fn remove_phi_operand(&mut self, pred: &Label) {
        assert!(self.is_phi());
        if let Some(idx) = self.operands.chunks_exact(2).position(|pair| pair[0].as_label() == Some(pred)) {
            self.operands.drain(idx * 2..idx * 2 + 2);
        }
    }

    /// Reverse operand order for commutative/comparator opcodes, swapping
    /// the opcode itself for comparators (`gt` <-> `lt`).
    pub fn flip(&mut self) {
        assert!(self.opcode.is_flippable(), "flip called on non-flippable opcode {}", self.opcode);
        self.operands.reverse();
        if self.opcode.is_comparator() {
            self.opcode = self.opcode.flip_comparator();
        }
    }

    /// Approximate code-size weight used by the literal/codesize pass:
    /// stores cost one word, everything else two.
    pub fn code_size_cost(&self) -> u32 {
        match self.opcode {
            Opcode::Store => 1,
            _ => 2,
        }
    }

    /// Clone this instruction with every variable operand/output renamed
    /// via `rename`, used when copying a function body (e.g. inlining).
    pub fn copy_with(&self, rename: impl Fn(&Variable) -> Variable) -> Instruction {
        let operands = self
            .operands
            .iter()
            .map(|op| match op {
                Operand::Variable(v) => Operand::Variable(rename(v)),
                other => other.clone(),
            })
            .collect();
        Instruction {
            opcode: self.opcode,
            operands,
            output: self.output.as_ref().map(rename),
            liveness: FxHashSet::default(),
            annotation: self.annotation.clone(),
            ast_source: self.ast_source,
            error_msg: None,
        }
    }
}

impl Instruction {
    /// Operands in the order a human reads them left-to-right in the
    /// textual IR, the inverse of how they're stored internally.
    /// Internally, operands are reversed so `operands[-1]` is the
    /// conceptual stack top — except for `jmp`/`jnz`/`djmp`/`phi`, whose
    /// order is meaningful to read and is therefore stored unreversed, and
    /// `invoke`, which keeps its callee label first and reverses only the
    /// trailing stack arguments.
    pub fn operands_in_source_order(&self) -> Vec<&Operand> {
        match self.opcode {
            Opcode::Jmp | Opcode::Jnz | Opcode::DJmp | Opcode::Phi => self.operands.iter().collect(),
            Opcode::Invoke => {
                let mut v: Vec<&Operand> = self.operands.iter().skip(1).rev().collect();
                if let Some(callee) = self.operands.first() {
                    v.insert(0, callee);
                }
                v
            }
            _ => self.operands.iter().rev().collect(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(out) = &self.output {
            write!(f, "{out} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        for op in self.operands_in_source_order() {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    #[test]
    fn flip_reverses_operands_and_swaps_comparator() {
        let mut inst = Instruction::new(
            Opcode::Gt,
            vec![Operand::from(var("a")), Operand::from(var("b"))],
            Some(var("out")),
        );
        inst.flip();
        assert_eq!(inst.opcode, Opcode::Lt);
        assert_eq!(inst.operands[0].as_variable().unwrap().name(), "b");
        assert_eq!(inst.operands[1].as_variable().unwrap().name(), "a");
    }

    #[test]
    fn phi_operand_removal_drops_pair() {
        let mut inst = Instruction::new(
            Opcode::Phi,
            vec![
                Operand::from(Label::new("bb0")),
                Operand::from(var("x")),
                Operand::from(Label::new("bb1")),
                Operand::from(var("y")),
            ],
            Some(var("z")),
        );
        inst.remove_phi_operand(&Label::new("bb0"));
        assert_eq!(inst.phi_operands().count(), 1);
    }

    #[test]
    fn display_reverses_non_control_operands() {
        let inst = Instruction::new(
            Opcode::Add,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(2u64))],
            Some(var("r")),
        );
        assert_eq!(format!("{inst}"), "%r = add 2 1");
    }

    #[test]
    fn make_nop_clears_operands_and_output() {
        let mut inst = Instruction::new(Opcode::Add, vec![Operand::literal(U256::from(1u64))], Some(var("r")));
        inst.make_nop();
        assert_eq!(inst.opcode, Opcode::Nop);
        assert!(inst.operands.is_empty());
        assert!(inst.output.is_none());
    }
}
