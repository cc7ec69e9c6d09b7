//! Textual IR printer (spec §4.2): the inverse of [`crate::parser`],
//! producing exactly the grammar the parser accepts so that
//! `parse(print(ctx))` round-trips structurally.

use std::fmt::Write as _;

use crate::ir::{Context, DataItem, Function, Instruction, Operand};

pub fn print_context(ctx: &Context) -> String {
    let mut out = String::new();
    for func in ctx.functions() {
        print_function_into(func, &mut out);
    }
    if !ctx.data_segments.is_empty() {
        out.push_str("data readonly {\n");
        for section in &ctx.data_segments {
            writeln!(out, "    dbsection {}:", section.label).unwrap();
            for item in &section.items {
                match item {
                    DataItem::LabelRef(l) => writeln!(out, "        db @{l}").unwrap(),
                    DataItem::Bytes(bytes) => {
                        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                        writeln!(out, "        db x\"{hex}\"").unwrap();
                    }
                }
            }
        }
        out.push_str("}\n");
    }
    out
}

pub fn print_function(func: &Function) -> String {
    let mut out = String::new();
    print_function_into(func, &mut out);
    out
}

fn print_function_into(func: &Function, out: &mut String) {
    writeln!(out, "function {} {{", func.name).unwrap();
    for block in func.blocks() {
        writeln!(out, "{}:", block.label).unwrap();
        for inst in &block.instructions {
            writeln!(out, "    {}", print_instruction(inst)).unwrap();
        }
    }
    out.push_str("}\n");
}

pub fn print_instruction(inst: &Instruction) -> String {
    let mut out = String::new();
    if let Some(o) = &inst.output {
        write!(out, "{o} = ").unwrap();
    }
    write!(out, "{}", inst.opcode).unwrap();
    let operands = inst.operands_in_source_order();
    for (i, op) in operands.iter().enumerate() {
        if i == 0 {
            out.push(' ');
        } else {
            out.push_str(", ");
        }
        out.push_str(&print_operand(op));
    }
    out
}

fn print_operand(op: &Operand) -> String {
    op.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Label, Opcode, Operand, Variable};
    use alloy_primitives::U256;

    #[test]
    fn prints_comma_separated_left_to_right_for_jnz() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::from(Variable::new("cond")),
                Operand::from(Label::new("t")),
                Operand::from(Label::new("f_")),
            ],
            None,
        ));
        let mut t = BasicBlock::new(Label::new("t"));
        t.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(t);
        let mut f_ = BasicBlock::new(Label::new("f_"));
        f_.append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func.add_block(f_);

        let text = print_function(&func);
        assert!(text.contains("jnz %cond, @t, @f_"));
    }

    #[test]
    fn prints_non_control_operands_in_source_order() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::literal(U256::from(1u64)), Operand::literal(U256::from(2u64))],
            Some(Variable::new("r")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        let text = print_function(&func);
        // stored reversed internally; printed left-to-right as source: `add 2, 1`.
        assert!(text.contains("%r = add 2, 1"));
    }
}
