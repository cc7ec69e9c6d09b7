//! Pre-assembly normalization (spec §4.12 step 1): `SimplifyCFG`, `MakeSSA`,
//! `SingleUseExpansion`, `CFGNormalization`, then `freshen_varnames`, run in
//! that fixed order right before a function is walked by
//! [`super::assemble`].

use rustc_hash::FxHashMap;

use crate::analysis::{cfg, AnalysesCache, Analysis, DominatorTree};
use crate::errors::VenomResult;
use crate::ir::{BasicBlock, Function, Instruction, Label, Opcode, Operand, Variable};
use crate::passes::Pass;

pub fn normalize(func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<()> {
    simplify_cfg(func)?;
    crate::ssa::make_ssa(func)?;
    cache.clear();
    single_use_expansion(func, cache)?;
    cfg_normalization(func)?;
    freshen_varnames(func)?;
    cache.clear();
    Ok(())
}

/// Remove empty fall-through blocks (a lone unconditional `jmp`, nothing
/// else) and fold a `jnz` whose two targets coincide into a plain `jmp`.
/// Runs to a fixed point since removing one bridge block can expose
/// another.
pub fn simplify_cfg(func: &mut Function) -> VenomResult<()> {
    loop {
        fold_identical_successors(func)?;
        let before = func.block_count();
        remove_empty_fallthrough_blocks(func)?;
        if func.block_count() == before {
            break;
        }
    }
    Ok(())
}

fn fold_identical_successors(func: &mut Function) -> VenomResult<()> {
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let block = func.get_block_mut(&label).expect("label exists");
        let Some(term) = block.instructions.last() else { continue };
        if term.opcode != Opcode::Jnz {
            continue;
        }
        let targets: Vec<Label> = term.label_operands().cloned().collect();
        if targets.len() == 2 && targets[0] == targets[1] {
            let target = targets[0].clone();
            let idx = block.instructions.len() - 1;
            block.instructions[idx] = Instruction::new(Opcode::Jmp, vec![Operand::from(target)], None);
        }
    }
    cfg::calculate_cfg(func)?;
    Ok(())
}

fn is_pure_jmp_bridge(func: &Function, label: &Label) -> bool {
    if label == func.entry_label() {
        return false;
    }
    match func.get_block(label) {
        Some(block) => block.instructions.len() == 1 && block.instructions[0].opcode == Opcode::Jmp,
        None => false,
    }
}

/// Collapse one bridge block, rewiring every real predecessor directly to
/// its target and duplicating whatever value the bridge contributed to
/// the target's phis across each of those predecessors (the bridge had
/// exactly one incoming value per phi, and every predecessor that used to
/// reach the phi through the bridge observed that same value).
fn remove_empty_fallthrough_blocks(func: &mut Function) -> VenomResult<()> {
    loop {
        let Some(bridge) = func.block_labels().cloned().find(|l| is_pure_jmp_bridge(func, l)) else { break };
        let target = func.try_get_block(&bridge)?.instructions[0]
            .label_operands()
            .next()
            .cloned()
            .expect("jmp has a target");
        let preds: Vec<Label> = func.try_get_block(&bridge)?.cfg_in.iter().cloned().collect();

        let target_phi_values: Vec<(usize, Operand)> = func
            .try_get_block(&target)?
            .phi_instructions()
            .enumerate()
            .filter_map(|(i, phi)| phi.phi_operands().find(|(l, _)| **l == bridge).map(|(_, v)| (i, v.clone())))
            .collect();

        for pred in &preds {
            if let Some(pred_block) = func.get_block_mut(pred) {
                if let Some(term) = pred_block.instructions.last_mut() {
                    for op in term.operands.iter_mut() {
                        if op.as_label() == Some(&bridge) {
                            *op = Operand::from(target.clone());
                        }
                    }
                }
            }
        }

        if let Some(target_block) = func.get_block_mut(&target) {
            for (phi_idx, value) in &target_phi_values {
                if let Some(phi) = target_block.phi_instructions_mut().nth(*phi_idx) {
                    phi.remove_phi_operand(&bridge);
                    for pred in &preds {
                        phi.operands.push(Operand::from(pred.clone()));
                        phi.operands.push(value.clone());
                    }
                }
            }
            target_block.remove_cfg_in(&bridge);
            for pred in &preds {
                target_block.add_cfg_in(pred.clone());
            }
        }
        func.remove_block(&bridge);
    }
    cfg::calculate_cfg(func)?;
    Ok(())
}

/// Scheduling a single-use producer directly next to its consumer is
/// exactly what [`crate::passes::dft::DepthFirstScheduling`] already does;
/// reuse it here instead of a second, near-identical walk.
fn single_use_expansion(func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<()> {
    crate::passes::dft::DepthFirstScheduling.run(func, cache)?;
    Ok(())
}

/// Ensure a unique entry, split every critical edge so each successor of a
/// multi-way branch gets its own single-predecessor arrival point (the
/// point where the stack scheduler can unambiguously arrange the phi
/// values that successor expects), then re-sort every block into
/// phi/param, body, terminator order.
pub fn cfg_normalization(func: &mut Function) -> VenomResult<()> {
    ensure_unique_entry(func)?;
    split_critical_edges(func)?;
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        func.get_block_mut(&label).expect("label exists").canonicalize_order()?;
    }
    Ok(())
}

fn ensure_unique_entry(func: &mut Function) -> VenomResult<()> {
    cfg::calculate_cfg(func)?;
    let entry = func.entry_label().clone();
    if func.try_get_block(&entry)?.cfg_in.is_empty() {
        return Ok(());
    }
    let fresh = func.next_label("entry");
    let mut block = BasicBlock::new(fresh.clone());
    block.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(entry.clone())], None));
    block.add_cfg_out(entry.clone());
    func.add_block(block);
    func.set_entry_label(fresh.clone());
    func.get_block_mut(&entry).expect("entry exists").add_cfg_in(fresh);
    Ok(())
}

/// A `jnz` with more than one distinct target is a critical edge for both
/// of its successors at once; give each target its own trampoline (a
/// fresh block holding nothing but `jmp target`) so that block, and only
/// that block, owns the stack arrangement for that one edge.
fn split_critical_edges(func: &mut Function) -> VenomResult<()> {
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let (opcode, targets) = {
            let term = func.try_get_block(&label)?.instructions.last().cloned().expect("terminated");
            (term.opcode, term.label_operands().cloned().collect::<Vec<_>>())
        };
        if opcode != Opcode::Jnz {
            continue;
        }
        let mut unique_targets: Vec<Label> = Vec::new();
        for t in &targets {
            if !unique_targets.contains(t) {
                unique_targets.push(t.clone());
            }
        }
        if unique_targets.len() < 2 {
            continue;
        }

        let mut new_operands = func.try_get_block(&label)?.instructions.last().unwrap().operands.clone();
        for target in &unique_targets {
            let trampoline = func.next_label("edge");
            let mut block = BasicBlock::new(trampoline.clone());
            block.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(target.clone())], None));
            block.add_cfg_in(label.clone());
            block.add_cfg_out(target.clone());

            for op in new_operands.iter_mut() {
                if op.as_label() == Some(target) {
                    *op = Operand::from(trampoline.clone());
                }
            }

            if let Some(succ) = func.get_block_mut(target) {
                succ.remove_cfg_in(&label);
                succ.add_cfg_in(trampoline.clone());
                for phi in succ.phi_instructions_mut() {
                    for pair in phi.operands.chunks_exact_mut(2) {
                        if pair[0].as_label() == Some(&label) {
                            pair[0] = Operand::from(trampoline.clone());
                        }
                    }
                }
            }
            func.add_block(block);
        }
        func.get_block_mut(&label).expect("label exists").instructions.last_mut().unwrap().operands = new_operands;
    }
    cfg::calculate_cfg(func)?;
    Ok(())
}

/// Renumber every variable to `%v0`, `%v1`, ... in reverse-postorder
/// definition order, so two semantically identical functions always print
/// identically regardless of what names the front end or an optimization
/// pass happened to leave behind.
pub fn freshen_varnames(func: &mut Function) -> VenomResult<()> {
    let dom = DominatorTree::analyze(func)?;
    let order: Vec<Label> = dom.reverse_postorder().to_vec();

    let mut rename: FxHashMap<Variable, Variable> = FxHashMap::default();
    let mut counter = 0u32;
    for label in &order {
        for inst in &func.try_get_block(label)?.instructions {
            if let Some(out) = &inst.output {
                if !rename.contains_key(out) {
                    rename.insert(out.clone(), Variable::new(format!("v{counter}")));
                    counter += 1;
                }
            }
        }
    }

    for label in &order {
        let block = func.get_block_mut(label).expect("label exists");
        for inst in &mut block.instructions {
            if let Some(out) = &inst.output {
                if let Some(new) = rename.get(out) {
                    inst.output = Some(new.clone());
                }
            }
            for op in &mut inst.operands {
                if let Operand::Variable(v) = op {
                    if let Some(new) = rename.get(v) {
                        *v = new.clone();
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Variable};
    use alloy_primitives::U256;

    #[test]
    fn fold_identical_successors_becomes_jmp() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![Operand::literal(U256::ZERO), Operand::from(Label::new("a")), Operand::from(Label::new("a"))],
            None,
        ));
        let mut a = BasicBlock::new(Label::new("a"));
        a.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(a);

        fold_identical_successors(&mut func).unwrap();
        assert_eq!(func.entry().instructions[0].opcode, Opcode::Jmp);
    }

    #[test]
    fn empty_bridge_is_removed_and_predecessor_retargeted() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("bridge"))], None));
        let mut bridge = BasicBlock::new(Label::new("bridge"));
        bridge.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("target"))], None));
        func.add_block(bridge);
        let mut target = BasicBlock::new(Label::new("target"));
        target.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(target);
        cfg::calculate_cfg(&mut func).unwrap();

        simplify_cfg(&mut func).unwrap();
        assert!(func.get_block(&Label::new("bridge")).is_none());
        assert_eq!(func.entry().instructions[0].label_operands().next(), Some(&Label::new("target")));
    }

    #[test]
    fn critical_edge_gets_its_own_trampoline() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![Operand::literal(U256::from(1u64)), Operand::from(Label::new("left")), Operand::from(Label::new("right"))],
            None,
        ));
        let mut left = BasicBlock::new(Label::new("left"));
        left.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(left);
        let mut right = BasicBlock::new(Label::new("right"));
        right.append_instruction(Instruction::new(Opcode::Jmp, vec![Operand::from(Label::new("join"))], None));
        func.add_block(right);
        let mut join = BasicBlock::new(Label::new("join"));
        join.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(join);
        cfg::calculate_cfg(&mut func).unwrap();

        split_critical_edges(&mut func).unwrap();
        let entry_targets: Vec<Label> = func.entry().instructions[0].label_operands().cloned().collect();
        assert!(entry_targets.iter().all(|t| t.name().starts_with("edge")));
    }

    #[test]
    fn freshen_varnames_assigns_sequential_names() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("weird_name"))));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        freshen_varnames(&mut func).unwrap();
        assert_eq!(func.entry().instructions[0].output, Some(Variable::new("v0")));
    }
}
