//! Venom-to-assembly scheduler (spec §4.12 steps 2-6): walks a normalized
//! function in reverse-postorder and drives [`StackSpiller`] block by block,
//! emitting a flat [`Asm`] list.
//!
//! Grounded on the solar codegen file's per-block shape (label, reset
//! scheduler, walk non-phi instructions, terminator last) plus spec §4.12's
//! algorithm description for everything that file doesn't cover (how a
//! block's live-in layout is pinned down so every predecessor can agree on
//! it without sharing mutable state).
//!
//! A block's *canonical entry layout* is its live-in variable set, sorted
//! by name (stable after `freshen_varnames`, so two predecessors computing
//! it independently always agree). A plain `jmp` predecessor reorders its
//! exit stack to match that layout directly. A `jnz`, after normalization,
//! always branches to two single-predecessor trampolines; since the EVM
//! stack is one physical structure shared by both possible continuations,
//! the `jnz` block instead exits into the *union* of both trampolines'
//! layouts, and each trampoline performs its own local reorder down to
//! what it actually needs before its `jmp`. Both sides derive the union
//! the same way from the same static CFG shape, so again no state needs
//! threading between blocks.

use rustc_hash::FxHashSet;

use crate::analysis::{AnalysesCache, Analysis, DataFlowGraph, DominatorTree, LivenessAnalysis};
use crate::config::TargetConfig;
use crate::errors::VenomResult;
use crate::ir::{Function, Instruction, Label, Opcode, Operand, Variable};
use crate::stack::{Asm, StackModel, StackSpiller};

use super::normalize;

pub fn assemble(func: &mut Function, config: TargetConfig, cache: &mut AnalysesCache) -> VenomResult<Vec<Asm>> {
    normalize::normalize(func, cache)?;

    let order: Vec<Label> = cache.request::<DominatorTree>(func)?.reverse_postorder().to_vec();
    cache.request::<LivenessAnalysis>(func)?;

    let mut spiller = StackSpiller::new(config);
    spiller.begin_function(func);

    let mut assembly = Vec::new();
    for label in &order {
        assemble_block(func, label, &order, cache, &mut spiller, &mut assembly)?;
    }
    Ok(assembly)
}

fn assemble_block(
    func: &mut Function,
    label: &Label,
    order: &[Label],
    cache: &mut AnalysesCache,
    spiller: &mut StackSpiller,
    assembly: &mut Vec<Asm>,
) -> VenomResult<()> {
    assembly.push(Asm::Label(label.clone()));

    let mut stack = StackModel::new();
    if label == func.entry_label() {
        initialize_entry(func, label, cache, spiller, &mut stack, assembly)?;
    } else {
        for var in assumed_entry_layout(func, label)? {
            stack.push(Operand::from(var));
        }
    }

    let body: Vec<Instruction> = func.try_get_block(label)?.body_instructions().cloned().collect();
    let liveness_after: Vec<FxHashSet<Variable>> = {
        let block = func.try_get_block(label)?;
        let non_phi_non_param: Vec<&Instruction> = block.instructions.iter().filter(|i| !i.is_pseudo() && !i.is_bb_terminator()).collect();
        non_phi_non_param
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if i + 1 < non_phi_non_param.len() {
                    non_phi_non_param[i + 1].liveness.clone()
                } else {
                    block.out_vars.clone()
                }
            })
            .collect()
    };

    for (i, inst) in body.iter().enumerate() {
        assemble_instruction(func, inst, cache, spiller, &mut stack, assembly)?;
        let live_after = liveness_after.get(i).cloned().unwrap_or_default();
        spiller.release_dead(&live_after);
        drop_dead_outputs(&mut stack, &live_after, assembly);
    }

    assemble_terminator(func, label, order, cache, spiller, &mut stack, assembly)?;
    Ok(())
}

/// Params are already on the physical stack in declaration order when the
/// function is entered (the caller's `invoke` arranged them); pop any that
/// are never referenced right away.
fn initialize_entry(
    func: &mut Function,
    label: &Label,
    cache: &mut AnalysesCache,
    spiller: &mut StackSpiller,
    stack: &mut StackModel,
    assembly: &mut Vec<Asm>,
) -> VenomResult<()> {
    let params: Vec<Variable> = func.try_get_block(label)?.param_instructions().filter_map(|i| i.output.clone()).collect();
    for p in &params {
        stack.push(Operand::from(p.clone()));
    }
    let dfg = cache.request::<DataFlowGraph>(func)?;
    let dead: FxHashSet<Operand> = params
        .iter()
        .filter(|p| dfg.uses(p).is_empty())
        .map(|p| Operand::from(p.clone()))
        .collect();
    popmany(func, spiller, stack, &dead, assembly)?;
    Ok(())
}

fn assemble_instruction(
    func: &mut Function,
    inst: &Instruction,
    cache: &mut AnalysesCache,
    spiller: &mut StackSpiller,
    stack: &mut StackModel,
    assembly: &mut Vec<Asm>,
) -> VenomResult<()> {
    match inst.opcode {
        // A `store` is a pure SSA rename: the DFG's equivalence classes
        // (built over `store` chains) already let `reorder` find the
        // source value under the output's name later. Nothing to emit.
        Opcode::Store | Opcode::Nop => {}

        // The allocator decided the address at `acquire_offset` time;
        // there is nothing to compute here, just make the constant
        // available to later instructions under the output's name.
        Opcode::Alloca | Opcode::Palloca | Opcode::Calloca => {
            let offset = inst.operands.first().and_then(Operand::as_literal).expect("alloca offset operand");
            assembly.push(Asm::Push(offset));
            if let Some(out) = &inst.output {
                stack.push(Operand::from(out.clone()));
            }
        }

        Opcode::Offset => {
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &inst.operands, assembly)?;
            assembly.push(Asm::Mnemonic("ADD"));
            stack.pop(inst.operands.len());
            if let Some(out) = &inst.output {
                stack.push(Operand::from(out.clone()));
            }
        }

        // Data-segment declarations are a whole-context concern, never
        // emitted from inside a function body.
        Opcode::Db | Opcode::DbName => {}

        // Forbidden in production output; normalization is expected to
        // have already rejected it by the time assembly runs.
        Opcode::Sink => {}

        // A same-contract subroutine call: push a return site, jump to
        // the callee with its trailing arguments arranged below it, and
        // mark the landing point so `ret` has somewhere to come back to.
        Opcode::Invoke => {
            let callee = inst.operands.first().and_then(Operand::as_label).cloned().expect("invoke callee");
            let args: Vec<Operand> = inst.operands.iter().skip(1).cloned().collect();
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &args, assembly)?;
            let return_site = func.next_label("ret");
            assembly.push(Asm::PushLabel(return_site.clone()));
            assembly.push(Asm::PushLabel(callee));
            assembly.push(Asm::Mnemonic("JUMP"));
            assembly.push(Asm::Label(return_site));
            stack.pop(args.len());
            if let Some(out) = &inst.output {
                stack.push(Operand::from(out.clone()));
            }
        }

        _ => {
            let dfg = cache.request::<DataFlowGraph>(func)?;
            // Internal storage is already bottom-to-top stack order (see
            // `Instruction::operands_in_source_order`'s doc comment), so
            // `operands` is exactly what the spiller needs as `wanted`.
            spiller.reorder(func, stack, dfg, &inst.operands, assembly)?;
            assembly.push(Asm::Mnemonic(evm_mnemonic(inst.opcode)));
            stack.pop(inst.operands.len());
            if let Some(out) = &inst.output {
                stack.push(Operand::from(out.clone()));
            }
        }
    }
    Ok(())
}

/// Any value this block will never use again, still sitting on the
/// physical stack right after being produced, is removed immediately
/// rather than left to accumulate until the block's terminator.
fn drop_dead_outputs(stack: &mut StackModel, live_after: &FxHashSet<Variable>, assembly: &mut Vec<Asm>) {
    while stack.height() > 0 {
        let top = stack.peek(0).clone();
        let dead = match top.as_variable() {
            Some(v) => !live_after.contains(v),
            None => false,
        };
        if !dead {
            break;
        }
        stack.pop(1);
        assembly.push(Asm::Mnemonic("POP"));
    }
}

fn assemble_terminator(
    func: &mut Function,
    label: &Label,
    order: &[Label],
    cache: &mut AnalysesCache,
    spiller: &mut StackSpiller,
    stack: &mut StackModel,
    assembly: &mut Vec<Asm>,
) -> VenomResult<()> {
    let term = func.try_get_block(label)?.instructions.last().cloned().expect("block is terminated");
    match term.opcode {
        Opcode::Jmp => {
            let target = term.label_operands().next().cloned().expect("jmp has a target");
            let wanted: Vec<Operand> = assumed_entry_layout(func, &target)?.into_iter().map(Operand::from).collect();
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &wanted, assembly)?;
            drop_everything_else(stack, &wanted, assembly);
            assembly.push(Asm::PushLabel(target));
            assembly.push(Asm::Mnemonic("JUMP"));
        }
        Opcode::Jnz => {
            let mut labels = term.label_operands().cloned();
            let left = labels.next().expect("jnz has a true target");
            let right = labels.next().expect("jnz has a false target");
            let cond = term.operands.first().cloned().expect("jnz has a condition");

            let union = jnz_union_layout(func, &left, &right)?;
            let mut wanted: Vec<Operand> = union.into_iter().map(Operand::from).collect();
            wanted.push(cond.clone());

            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &wanted, assembly)?;
            drop_everything_else(stack, &wanted, assembly);

            stack.pop(1); // the condition, consumed by JUMPI
            assembly.push(Asm::PushLabel(left));
            assembly.push(Asm::Mnemonic("JUMPI"));
            assembly.push(Asm::PushLabel(right));
            assembly.push(Asm::Mnemonic("JUMP"));
        }
        Opcode::DJmp => {
            // Computed jumps resolve against a pre-built dispatch table
            // this core has no data-segment integration point for yet;
            // the index operand is treated as an already-resolved
            // destination, same simplification `ir/opcode.rs`'s docs
            // leave for anything this core doesn't model end to end.
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &term.operands, assembly)?;
            assembly.push(Asm::Mnemonic("JUMP"));
            stack.pop(term.operands.len());
        }
        Opcode::Ret => {
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &term.operands, assembly)?;
            assembly.push(Asm::Mnemonic("JUMP"));
            stack.pop(term.operands.len());
        }
        _ => {
            // Stop/Return/Exit/Revert/Sink: no successor, arrange whatever
            // value operands the opcode itself needs and emit it.
            let dfg = cache.request::<DataFlowGraph>(func)?;
            spiller.reorder(func, stack, dfg, &term.operands, assembly)?;
            assembly.push(Asm::Mnemonic(evm_mnemonic(term.opcode)));
            stack.pop(term.operands.len());
        }
    }
    let _ = order;
    Ok(())
}

/// After reordering `wanted` to the top, pop anything still live further
/// down that this block's successor(s) don't need forwarded.
fn drop_everything_else(stack: &mut StackModel, wanted: &[Operand], assembly: &mut Vec<Asm>) {
    let keep = wanted.len();
    while stack.height() > keep {
        stack.pop(1);
        assembly.push(Asm::Mnemonic("POP"));
    }
}

/// popmany (spec §4.12): drop a set of operands from the stack, collapsing
/// a contiguous top suffix into plain pops and falling back to swap-then-pop
/// for anything buried deeper.
fn popmany(func: &mut Function, spiller: &mut StackSpiller, stack: &mut StackModel, dead: &FxHashSet<Operand>, assembly: &mut Vec<Asm>) -> VenomResult<()> {
    while stack.height() > 0 && dead.contains(stack.peek(0)) {
        stack.pop(1);
        assembly.push(Asm::Mnemonic("POP"));
    }
    loop {
        let found = stack.as_slice().iter().rev().enumerate().find(|(_, op)| dead.contains(op)).map(|(i, _)| -(i as i64));
        let Some(depth) = found else { break };
        spiller.swap(func, stack, depth, assembly)?;
        stack.pop(1);
        assembly.push(Asm::Mnemonic("POP"));
    }
    Ok(())
}

fn canonical_entry_layout(func: &Function, label: &Label) -> VenomResult<Vec<Variable>> {
    let block = func.try_get_block(label)?;
    let mut vars: Vec<Variable> = block.liveness_in_vars().into_iter().collect();
    vars.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(vars)
}

fn jnz_union_layout(func: &Function, left: &Label, right: &Label) -> VenomResult<Vec<Variable>> {
    let mut vars: Vec<Variable> = canonical_entry_layout(func, left)?;
    for v in canonical_entry_layout(func, right)? {
        if !vars.contains(&v) {
            vars.push(v);
        }
    }
    vars.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(vars)
}

/// What a block assumes is already on the physical stack when control
/// reaches it: its own canonical layout, unless its single predecessor is
/// a `jnz` (a trampoline), in which case it's that `jnz`'s union layout —
/// see the module doc comment for why.
fn assumed_entry_layout(func: &Function, label: &Label) -> VenomResult<Vec<Variable>> {
    let block = func.try_get_block(label)?;
    if block.cfg_in.len() == 1 {
        let pred_label = block.cfg_in.iter().next().expect("len == 1");
        let pred = func.try_get_block(pred_label)?;
        if let Some(term) = pred.instructions.last() {
            if term.opcode == Opcode::Jnz {
                let mut labels = term.label_operands();
                let left = labels.next().expect("jnz has a true target").clone();
                let right = labels.next().expect("jnz has a false target").clone();
                return jnz_union_layout(func, &left, &right);
            }
        }
    }
    canonical_entry_layout(func, label)
}

/// Uppercase EVM mnemonic for a real (non-pseudo, non-Venom-only) opcode.
/// Pseudo-ops (`phi`, `param`, `nop`, `store`, `offset`, `alloca` family,
/// `invoke`) never reach here; they're either skipped entirely or lowered
/// by the caller before this is consulted.
fn evm_mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "ADD",
        Opcode::Sub => "SUB",
        Opcode::Mul => "MUL",
        Opcode::Div => "DIV",
        Opcode::SDiv => "SDIV",
        Opcode::Mod => "MOD",
        Opcode::SMod => "SMOD",
        Opcode::AddMod => "ADDMOD",
        Opcode::MulMod => "MULMOD",
        Opcode::Exp => "EXP",
        Opcode::SignExtend => "SIGNEXTEND",
        Opcode::Lt => "LT",
        Opcode::Gt => "GT",
        Opcode::Slt => "SLT",
        Opcode::Sgt => "SGT",
        Opcode::Eq => "EQ",
        Opcode::IsZero => "ISZERO",
        Opcode::And => "AND",
        Opcode::Or => "OR",
        Opcode::Xor => "XOR",
        Opcode::Not => "NOT",
        Opcode::Shl => "SHL",
        Opcode::Shr => "SHR",
        Opcode::Sar => "SAR",
        Opcode::Byte => "BYTE",
        Opcode::Sha3 => "SHA3",
        Opcode::Address => "ADDRESS",
        Opcode::Balance => "BALANCE",
        Opcode::Origin => "ORIGIN",
        Opcode::Caller => "CALLER",
        Opcode::CallValue => "CALLVALUE",
        Opcode::CallDataLoad => "CALLDATALOAD",
        Opcode::CallDataSize => "CALLDATASIZE",
        Opcode::CallDataCopy => "CALLDATACOPY",
        Opcode::CodeSize => "CODESIZE",
        Opcode::CodeCopy => "CODECOPY",
        Opcode::GasPrice => "GASPRICE",
        Opcode::ExtCodeSize => "EXTCODESIZE",
        Opcode::ExtCodeCopy => "EXTCODECOPY",
        Opcode::ReturnDataSize => "RETURNDATASIZE",
        Opcode::ReturnDataCopy => "RETURNDATACOPY",
        Opcode::ExtCodeHash => "EXTCODEHASH",
        Opcode::BlockHash => "BLOCKHASH",
        Opcode::CoinBase => "COINBASE",
        Opcode::Timestamp => "TIMESTAMP",
        Opcode::Number => "NUMBER",
        Opcode::PrevRandao => "PREVRANDAO",
        Opcode::GasLimit => "GASLIMIT",
        Opcode::ChainId => "CHAINID",
        Opcode::SelfBalance => "SELFBALANCE",
        Opcode::BaseFee => "BASEFEE",
        Opcode::BlobHash => "BLOBHASH",
        Opcode::BlobBaseFee => "BLOBBASEFEE",
        Opcode::MLoad => "MLOAD",
        Opcode::MStore => "MSTORE",
        Opcode::MCopy => "MCOPY",
        Opcode::MSize => "MSIZE",
        Opcode::SLoad => "SLOAD",
        Opcode::SStore => "SSTORE",
        Opcode::TLoad => "TLOAD",
        Opcode::TStore => "TSTORE",
        Opcode::DLoad => "DLOAD",
        Opcode::DLoadBytes => "DLOADBYTES",
        Opcode::Create => "CREATE",
        Opcode::Create2 => "CREATE2",
        Opcode::Call => "CALL",
        Opcode::CallCode => "CALLCODE",
        Opcode::DelegateCall => "DELEGATECALL",
        Opcode::StaticCall => "STATICCALL",
        Opcode::Invalid => "INVALID",
        Opcode::Revert => "REVERT",
        Opcode::SelfDestruct => "SELFDESTRUCT",
        Opcode::Gas => "GAS",
        Opcode::Pc => "PC",
        Opcode::Log0 => "LOG0",
        Opcode::Log1 => "LOG1",
        Opcode::Log2 => "LOG2",
        Opcode::Log3 => "LOG3",
        Opcode::Log4 => "LOG4",
        Opcode::Stop => "STOP",
        Opcode::Return => "RETURN",
        Opcode::Exit => "STOP",
        Opcode::AssertUnreachable => "INVALID",
        // Reserved for testing, forbidden in production output; treated as
        // a harmless `stop` rather than panicking if one slips through.
        Opcode::Sink => "STOP",
        Opcode::Assert => {
            unreachable!("assert must be lowered to a jnz/invalid pair before assembly")
        }
        other => unreachable!("opcode {other} has no direct EVM mnemonic; it must be lowered before assembly"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BasicBlock;
    use alloy_primitives::U256;

    fn straight_line_function() -> Function {
        let mut func = Function::new(Label::new("f"));
        let a = Variable::new("a");
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(a.clone())));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::from(a), Operand::literal(U256::from(1u64))],
            Some(Variable::new("b")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        func
    }

    #[test]
    fn assembles_straight_line_function_with_entry_label_first() {
        let mut func = straight_line_function();
        let mut cache = AnalysesCache::new();
        let asm = assemble(&mut func, TargetConfig::default(), &mut cache).unwrap();
        assert!(matches!(asm.first(), Some(Asm::Label(_))));
        assert!(asm.contains(&Asm::Mnemonic("ADD")));
        assert!(asm.contains(&Asm::Mnemonic("STOP")));
    }

    #[test]
    fn dead_param_is_popped_immediately() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("unused"))));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));
        let mut cache = AnalysesCache::new();
        let asm = assemble(&mut func, TargetConfig::default(), &mut cache).unwrap();
        assert!(asm.contains(&Asm::Mnemonic("POP")));
    }

    #[test]
    fn diamond_join_reassembles_without_error() {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(Variable::new("x"))));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![Operand::from(Variable::new("x")), Operand::from(Label::new("left")), Operand::from(Label::new("right"))],
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

        let mut cache = AnalysesCache::new();
        let asm = assemble(&mut func, TargetConfig::default(), &mut cache).unwrap();
        assert!(asm.iter().any(|a| matches!(a, Asm::Mnemonic("JUMPI"))));
    }
}
