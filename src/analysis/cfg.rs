//! CFG edge computation (spec §4.4, first half): derives `cfg_in`/`cfg_out`
//! from terminator label operands, plus the structural wiring a constructor
//! block implies.

use crate::errors::{VenomError, VenomResult};
use crate::ir::{Function, Label};

/// Recompute every block's `cfg_in`/`cfg_out` in `func` from scratch.
///
/// Structural rule: when a block literally named `deploy` is present (the
/// constructor pseudo-block), blocks named `fallback` or prefixed
/// `selector_bucket_` are wired as successors of the entry block even
/// though no `jmp`/`jnz` targets them directly — the selector dispatch
/// itself is represented implicitly rather than as explicit branches.
pub fn calculate_cfg(func: &mut Function) -> VenomResult<()> {
    let labels: Vec<Label> = func.block_labels().cloned().collect();
    for label in &labels {
        let block = func
            .get_block_mut(label)
            .ok_or_else(|| VenomError::panic(format!("missing block {label}"), label.to_string()))?;
        block.cfg_in.clear();
        block.cfg_out.clear();
    }

    let has_deploy_block = labels.iter().any(|l| l.name() == "deploy");
    if has_deploy_block {
        let entry = func.entry_label().clone();
        for label in &labels {
            if label.name() == "fallback" || label.name().starts_with("selector_bucket_") {
                add_edge(func, &entry, label)?;
            }
        }
    }

    for label in &labels {
        let terminator = {
            let block = func.try_get_block(label)?;
            block.instructions.last().cloned().ok_or_else(|| {
                VenomError::panic(format!("block {label} has no instructions"), label.to_string())
            })?
        };
        if !terminator.is_bb_terminator() {
            return Err(VenomError::panic(
                format!("block {label} does not end in a terminator"),
                terminator.to_string(),
            ));
        }
        if terminator.opcode.is_cfg_altering() {
            let targets: Vec<Label> = terminator.label_operands().cloned().collect();
            for target in &targets {
                add_edge(func, label, target)?;
            }
        }
    }
    Ok(())
}

fn add_edge(func: &mut Function, from: &Label, to: &Label) -> VenomResult<()> {
    func.get_block_mut(to)
        .ok_or_else(|| VenomError::panic(format!("jump target {to} does not exist"), from.to_string()))?
        .add_cfg_in(from.clone());
    func.get_block_mut(from)
        .ok_or_else(|| VenomError::panic(format!("block {from} does not exist"), from.to_string()))?
        .add_cfg_out(to.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Opcode, Operand};

    #[test]
    fn wires_reverse_index_from_jmp() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jmp,
            vec![Operand::from(Label::new("bb1"))],
            None,
        ));
        let mut bb1 = BasicBlock::new(Label::new("bb1"));
        bb1.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(bb1);

        calculate_cfg(&mut func).unwrap();
        assert!(func.get_block(&Label::new("bb1")).unwrap().cfg_in.contains(func.entry_label()));
        assert!(func.entry().cfg_out.contains(&Label::new("bb1")));
    }

    #[test]
    fn rejects_block_without_terminator() {
        let mut func = Function::new(Label::new("f"));
        let bb1 = BasicBlock::new(Label::new("bb1"));
        func.add_block(bb1);
        assert!(calculate_cfg(&mut func).is_err());
    }
}
