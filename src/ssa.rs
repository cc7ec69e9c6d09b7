//! MakeSSA (spec §4.8): dominance-frontier phi placement followed by a
//! dominator-tree-driven renaming walk, the textbook Cytron et al.
//! construction. The renaming walk uses one version-counter and one
//! version-stack per base variable name, pushed on entry to a dominator
//! subtree and popped on exit, matching the scoped-acquisition shape the
//! spec calls out explicitly.

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::dominators::DominatorTree;
use crate::analysis::Analysis;
use crate::errors::VenomResult;
use crate::ir::{Function, Instruction, Label, Opcode, Operand, Variable};

/// Convert `func` into valid SSA form in place: a fresh version on every
/// assignment, phis at every point a variable's definition meets a
/// competing one. Pre-existing phis are respected; after this runs, every
/// variable is assigned by exactly one instruction.
pub fn make_ssa(func: &mut Function) -> VenomResult<()> {
    let dom = DominatorTree::analyze(func)?;
    insert_phis(func, &dom)?;
    rename_variables(func, &dom)?;
    remove_degenerate_phis(func)?;
    Ok(())
}

fn insert_phis(func: &mut Function, dom: &DominatorTree) -> VenomResult<()> {
    let labels: Vec<Label> = func.block_labels().cloned().collect();
    let mut defs: FxHashMap<String, IndexSet<Label>> = FxHashMap::default();
    for label in &labels {
        let block = func.try_get_block(label)?;
        for inst in &block.instructions {
            if let Some(out) = &inst.output {
                defs.entry(out.name().to_string()).or_default().insert(label.clone());
            }
        }
    }

    for (name, def_blocks) in defs {
        let mut worklist: Vec<Label> = def_blocks.into_iter().collect();
        let mut in_def_set: FxHashSet<Label> = worklist.iter().cloned().collect();
        let mut has_phi: FxHashSet<Label> = FxHashSet::default();

        while let Some(b) = worklist.pop() {
            let Some(frontier) = dom.dominance_frontier(&b) else { continue };
            let frontier_blocks: Vec<Label> = frontier.iter().cloned().collect();
            for target in frontier_blocks {
                if has_phi.insert(target.clone()) {
                    let preds: Vec<Label> =
                        func.try_get_block(&target)?.cfg_in.iter().cloned().collect();
                    let mut ops = Vec::with_capacity(preds.len() * 2);
                    for pred in &preds {
                        ops.push(Operand::from(pred.clone()));
                        ops.push(Operand::from(Variable::new(name.clone())));
                    }
                    let out = Variable::new(name.clone());
                    let block = func.get_block_mut(&target).expect("frontier target exists");
                    block.insert_instruction(0, Instruction::new(Opcode::Phi, ops, Some(out)));
                }
                if in_def_set.insert(target.clone()) {
                    worklist.push(target);
                }
            }
        }
    }
    Ok(())
}

/// Per-base-name renaming state threaded through the dominator-tree walk.
struct RenameState {
    counters: FxHashMap<String, u32>,
    stacks: FxHashMap<String, Vec<u32>>,
}

impl RenameState {
    fn fresh(&mut self, name: &str) -> u32 {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        let version = *counter;
        *counter += 1;
        self.stacks.entry(name.to_string()).or_default().push(version);
        version
    }

    fn current(&self, name: &str) -> Option<u32> {
        self.stacks.get(name).and_then(|s| s.last()).copied()
    }

    fn pop(&mut self, name: &str) {
        self.stacks.get_mut(name).expect("pushed before popped").pop();
    }
}

fn rename_variables(func: &mut Function, dom: &DominatorTree) -> VenomResult<()> {
    let mut state = RenameState { counters: FxHashMap::default(), stacks: FxHashMap::default() };
    let entry = func.entry_label().clone();
    walk_block(func, dom, &entry, &mut state)
}

fn walk_block(func: &mut Function, dom: &DominatorTree, label: &Label, state: &mut RenameState) -> VenomResult<()> {
    let mut instructions = func.try_get_block(label)?.instructions.clone();
    let mut pushed_names: Vec<String> = Vec::new();

    for inst in instructions.iter_mut() {
        if !inst.is_phi() {
            for op in inst.operands.iter_mut() {
                if let Operand::Variable(v) = op {
                    if let Some(version) = state.current(v.name()) {
                        *v = v.with_version(version);
                    }
                }
            }
        }
        if let Some(out) = inst.output.clone() {
            let version = state.fresh(out.name());
            pushed_names.push(out.name().to_string());
            inst.output = Some(out.with_version(version));
        }
    }
    func.get_block_mut(label).expect("label exists").instructions = instructions;

    let succs: Vec<Label> = func.try_get_block(label)?.cfg_out.iter().cloned().collect();
    for succ in &succs {
        let block = func.get_block_mut(succ).expect("cfg_out target exists");
        for phi in block.phi_instructions_mut() {
            for pair in phi.operands.chunks_exact_mut(2) {
                if pair[0].as_label() == Some(label) {
                    if let Operand::Variable(v) = &pair[1] {
                        if let Some(version) = state.current(v.name()) {
                            pair[1] = Operand::Variable(v.with_version(version));
                        }
                    }
                }
            }
        }
    }

    for child in dom.children(label).to_vec() {
        walk_block(func, dom, &child, state)?;
    }

    for name in pushed_names {
        state.pop(&name);
    }
    Ok(())
}

/// Simplify phis that carry no real choice: a single incoming edge, or
/// every incoming value textually identical, both collapse to `store`. A
/// phi with no operands left (all predecessors pruned) becomes `nop`.
fn remove_degenerate_phis(func: &mut Function) -> VenomResult<()> {
    for block in func.blocks_mut() {
        for inst in block.instructions.iter_mut() {
            if !inst.is_phi() {
                continue;
            }
            let values: Vec<Operand> = inst.phi_operands().map(|(_, v)| v.clone()).collect();
            let degenerate = values.len() <= 1 || values.windows(2).all(|w| w[0] == w[1]);
            if !degenerate {
                continue;
            }
            match values.into_iter().next() {
                Some(v) => {
                    let out = inst.output.clone();
                    *inst = Instruction::new(Opcode::Store, vec![v], out);
                }
                None => inst.make_nop(),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Opcode, Operand};
    use alloy_primitives::U256;

    /// `x = 1; jnz cond, left, right` each assign `x`; `join` reads `x`.
    fn diamond_with_reassignment() -> Function {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Store,
            vec![Operand::literal(U256::from(0u64))],
            Some(Variable::new("x")),
        ));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::literal(U256::from(1u64)),
                Operand::from(Label::new("left")),
                Operand::from(Label::new("right")),
            ],
            None,
        ));

        let mut left = BasicBlock::new(Label::new("left"));
        left.append_instruction(Instruction::new(
            Opcode::Store,
            vec![Operand::literal(U256::from(1u64))],
            Some(Variable::new("x")),
        ));
        left.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(left);

        let mut right = BasicBlock::new(Label::new("right"));
        right.append_instruction(Instruction::new(
            Opcode::Store,
            vec![Operand::literal(U256::from(2u64))],
            Some(Variable::new("x")),
        ));
        right.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(right);

        let mut join = BasicBlock::new(Label::new("join"));
        join.append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::from(Variable::new("x")), Operand::literal(U256::from(1u64))],
            Some(Variable::new("y")),
        ));
        join.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(join);
        func
    }

    #[test]
    fn inserts_phi_at_join_and_versions_uses() {
        let mut func = diamond_with_reassignment();
        make_ssa(&mut func).unwrap();

        let join = func.get_block(&Label::new("join")).unwrap();
        assert!(join.instructions[0].is_phi());
        assert_eq!(join.instructions[0].output.as_ref().unwrap().name(), "x");

        // the `add` no longer reads the unversioned placeholder.
        let add = &join.instructions[1];
        assert!(add.input_variables().next().unwrap().version() > 0);
    }

    #[test]
    fn no_variable_assigned_twice_after_ssa() {
        let mut func = diamond_with_reassignment();
        make_ssa(&mut func).unwrap();

        let mut seen = FxHashSet::default();
        for block in func.blocks() {
            for inst in &block.instructions {
                if let Some(out) = &inst.output {
                    assert!(seen.insert(out.clone()), "variable {out} assigned more than once");
                }
            }
        }
    }

    #[test]
    fn single_predecessor_phi_collapses_to_store() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Store,
            vec![Operand::literal(U256::from(7u64))],
            Some(Variable::new("x")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("bb1"))], None));
        let mut bb1 = BasicBlock::new(Label::new("bb1"));
        bb1.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(bb1);

        make_ssa(&mut func).unwrap();
        // single-predecessor diamond never needed a phi at all; nothing to
        // collapse, but the pass must still succeed without one.
        assert!(func.get_block(&Label::new("bb1")).unwrap().instructions.iter().all(|i| !i.is_phi()));
    }
}
