//! Sparse Conditional Constant Propagation (spec §4.9), grounded on
//! `passes/sccp/sccp.py` and `passes/sccp/eval.py`: a dual worklist over
//! flow edges (which blocks actually execute) and SSA def-use edges (which
//! instructions need re-evaluating once an operand's lattice value
//! changes), converging on a three-point lattice of TOP (never seen),
//! BOTTOM (not constant), or a literal.
//!
//! Operands are stored in this crate the same way the original does: the
//! last-pushed (conceptually the EVM stack top) operand is `operands[0]`.
//! `gt a, b` in source order reads internally as `operands = [b, a]`, i.e.
//! `b > a`; the comparison folding below relies on that, matching the
//! original's own comment to the same effect.

use std::collections::VecDeque;

use alloy_primitives::U256;
use rustc_hash::{FxHashMap, FxHashSet};

use super::Pass;
use crate::analysis::cfg;
use crate::analysis::AnalysesCache;
use crate::errors::VenomResult;
use crate::ir::{Function, Label, Opcode, Operand, Variable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lattice {
    Top,
    Bottom,
    Const(U256),
}

fn meet(a: Lattice, b: Lattice) -> Lattice {
    match (a, b) {
        (Lattice::Top, x) | (x, Lattice::Top) => x,
        _ if a == b => a,
        _ => Lattice::Bottom,
    }
}

type InstLoc = (Label, usize);

enum WorkItem {
    Flow { start: Label, end: Label },
    Ssa(InstLoc),
}

pub struct Sccp;

impl Pass for Sccp {
    fn name(&self) -> &'static str {
        "sccp"
    }

    fn run(&mut self, func: &mut Function, cache: &mut AnalysesCache) -> VenomResult<bool> {
        let changed = run_sccp(func)?;
        if changed {
            cache.invalidate_cfg_dependents();
            cache.invalidate_instruction_dependents();
        }
        Ok(changed)
    }
}

struct State {
    lattice: FxHashMap<Variable, Lattice>,
    uses: FxHashMap<Variable, Vec<InstLoc>>,
    cfg_in_exec: FxHashMap<Label, FxHashSet<Label>>,
    work_list: VecDeque<WorkItem>,
    cfg_dirty: bool,
}

pub fn run_sccp(func: &mut Function) -> VenomResult<bool> {
    cfg::calculate_cfg(func)?;

    let mut uses: FxHashMap<Variable, Vec<InstLoc>> = FxHashMap::default();
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let block = func.try_get_block(&label)?;
        for (idx, inst) in block.instructions.iter().enumerate() {
            for v in inst.input_variables() {
                uses.entry(v.clone()).or_default().push((label.clone(), idx));
            }
        }
    }

    let mut lattice = FxHashMap::default();
    for v in uses.keys() {
        lattice.insert(v.clone(), Lattice::Top);
    }

    let mut state = State {
        lattice,
        uses,
        cfg_in_exec: FxHashMap::default(),
        work_list: VecDeque::new(),
        cfg_dirty: false,
    };

    let entry = func.entry_label().clone();
    let dummy = Label::new("__dummy_start__");
    state.work_list.push_back(WorkItem::Flow { start: dummy, end: entry });

    calculate(func, &mut state)?;
    propagate_constants(func, &mut state)?;
    let store_changed = propagate_variables(func, &mut state)?;

    Ok(state.cfg_dirty || store_changed)
}

fn calculate(func: &mut Function, state: &mut State) -> VenomResult<()> {
    while let Some(item) = state.work_list.pop_back() {
        match item {
            WorkItem::Flow { start, end } => {
                if !state.cfg_in_exec.entry(end.clone()).or_default().insert(start) {
                    continue;
                }

                // A phi is re-evaluated on every new incoming edge, not just
                // the first, since a later edge can change the `meet` result.
                let phi_count = func.try_get_block(&end)?.instructions.len();
                for idx in 0..phi_count {
                    if !func.try_get_block(&end)?.instructions[idx].is_phi() {
                        break;
                    }
                    visit_phi(func, state, &end, idx)?;
                }

                let exec_count = state.cfg_in_exec.get(&end).map(|s| s.len()).unwrap_or(0);
                if exec_count == 1 {
                    let count = func.try_get_block(&end)?.instructions.len();
                    for idx in 0..count {
                        let inst = &func.try_get_block(&end)?.instructions[idx];
                        if inst.is_phi() {
                            continue;
                        }
                        visit_expr(func, state, &end, idx)?;
                    }
                }

                let succs: Vec<Label> = func.try_get_block(&end)?.cfg_out.iter().cloned().collect();
                if succs.len() == 1 {
                    state.work_list.push_back(WorkItem::Flow { start: end.clone(), end: succs[0].clone() });
                }
            }
            WorkItem::Ssa((label, idx)) => {
                let inst_is_phi = func.try_get_block(&label)?.instructions[idx].is_phi();
                if inst_is_phi {
                    visit_phi(func, state, &label, idx)?;
                } else if state.cfg_in_exec.get(&label).map(|s| !s.is_empty()).unwrap_or(false) {
                    visit_expr(func, state, &label, idx)?;
                }
            }
        }
    }
    Ok(())
}

fn lattice_of(state: &State, op: &Operand) -> Lattice {
    match op {
        Operand::Literal(v) => Lattice::Const(*v),
        Operand::Variable(v) => *state.lattice.get(v).unwrap_or(&Lattice::Top),
        Operand::Label(_) => Lattice::Bottom,
    }
}

fn visit_phi(func: &Function, state: &mut State, label: &Label, idx: usize) -> VenomResult<()> {
    let block = func.try_get_block(label)?;
    let inst = &block.instructions[idx];
    let output = inst.output.clone().expect("phi always has an output");
    let exec = state.cfg_in_exec.get(label).cloned().unwrap_or_default();

    let mut value = Lattice::Top;
    for (pred, val) in inst.phi_operands() {
        if !exec.contains(pred) {
            continue;
        }
        value = meet(value, lattice_of(state, val));
    }

    let prior = *state.lattice.get(&output).unwrap_or(&Lattice::Top);
    if value != prior {
        state.lattice.insert(output.clone(), value);
        add_ssa_work_items(state, &output);
    }
    Ok(())
}

fn visit_expr(func: &Function, state: &mut State, label: &Label, idx: usize) -> VenomResult<()> {
    let inst = func.try_get_block(label)?.instructions[idx].clone();
    match inst.opcode {
        Opcode::Store | Opcode::Alloca => {
            let value = lattice_of(state, &inst.operands[0]);
            if let Some(out) = &inst.output {
                state.lattice.insert(out.clone(), value);
                add_ssa_work_items(state, out);
            }
        }
        Opcode::Jmp => {
            let target = inst.operands[0].as_label().expect("jmp target").clone();
            state.work_list.push_back(WorkItem::Flow { start: label.clone(), end: target });
        }
        Opcode::Jnz => {
            let cond = lattice_of(state, &inst.operands[0]);
            match cond {
                Lattice::Top => {} // predecessor not executed yet; nothing to do
                Lattice::Bottom => {
                    for succ in func.try_get_block(label)?.cfg_out.iter().cloned().collect::<Vec<_>>() {
                        state.work_list.push_back(WorkItem::Flow { start: label.clone(), end: succ });
                    }
                }
                Lattice::Const(v) => {
                    let target = if v.is_zero() {
                        inst.operands[1].as_label().expect("jnz false target")
                    } else {
                        inst.operands[2].as_label().expect("jnz true target")
                    }
                    .clone();
                    state.work_list.push_back(WorkItem::Flow { start: label.clone(), end: target });
                }
            }
        }
        Opcode::DJmp => {
            let cond = lattice_of(state, &inst.operands[0]);
            match cond {
                Lattice::Bottom | Lattice::Top => {
                    for op in &inst.operands[1..] {
                        if let Some(target) = op.as_label() {
                            state.work_list.push_back(WorkItem::Flow { start: label.clone(), end: target.clone() });
                        }
                    }
                }
                Lattice::Const(_) => {
                    // A literal djmp target is resolved by a dedicated
                    // lowering step before this pass runs in practice;
                    // conservatively treat every candidate as reachable.
                    for op in &inst.operands[1..] {
                        if let Some(target) = op.as_label() {
                            state.work_list.push_back(WorkItem::Flow { start: label.clone(), end: target.clone() });
                        }
                    }
                }
            }
        }
        Opcode::Param | Opcode::CallDataLoad => {
            if let Some(out) = &inst.output {
                state.lattice.insert(out.clone(), Lattice::Bottom);
                add_ssa_work_items(state, out);
            }
        }
        Opcode::MLoad => {
            if let Some(out) = &inst.output {
                state.lattice.insert(out.clone(), Lattice::Bottom);
            }
        }
        op if arithmetic_fn(op).is_some() => {
            eval_arithmetic(state, &inst)?;
        }
        _ => {
            if let Some(out) = &inst.output {
                state.lattice.insert(out.clone(), Lattice::Bottom);
            }
        }
    }
    Ok(())
}

fn add_ssa_work_items(state: &mut State, v: &Variable) {
    if let Some(uses) = state.uses.get(v).cloned() {
        for loc in uses {
            state.work_list.push_back(WorkItem::Ssa(loc));
        }
    }
}

fn eval_arithmetic(state: &mut State, inst: &crate::ir::Instruction) -> VenomResult<()> {
    let Some(out) = &inst.output else { return Ok(()) };
    let mut values = Vec::with_capacity(inst.operands.len());
    for op in &inst.operands {
        match op {
            Operand::Label(_) => {
                state.lattice.insert(out.clone(), Lattice::Bottom);
                return Ok(());
            }
            other => values.push(lattice_of(state, other)),
        }
    }
    if values.iter().any(|v| matches!(v, Lattice::Bottom)) {
        state.lattice.insert(out.clone(), Lattice::Bottom);
        return Ok(());
    }
    if values.iter().any(|v| matches!(v, Lattice::Top)) {
        // not all operands known yet; leave lattice entry as-is (still TOP).
        return Ok(());
    }
    let literals: Vec<U256> = values
        .into_iter()
        .map(|v| match v {
            Lattice::Const(x) => x,
            _ => unreachable!("filtered above"),
        })
        .collect();
    let result = arithmetic_fn(inst.opcode).expect("caller checked")(&literals);
    let prior = *state.lattice.get(out).unwrap_or(&Lattice::Top);
    if prior != Lattice::Const(result) {
        state.lattice.insert(out.clone(), Lattice::Const(result));
        add_ssa_work_items(state, out);
    }
    Ok(())
}

/// Maps an opcode to its constant-folding function, matching
/// `ARITHMETIC_OPS`. `None` for opcodes SCCP treats as opaque (`Bottom`).
/// Operands arrive already in internal (reversed) order: `ops[1]` is the
/// first source-order operand, `ops[0]` the second.
fn arithmetic_fn(opcode: Opcode) -> Option<fn(&[U256]) -> U256> {
    match opcode {
        Opcode::Add => Some(|o| o[1].wrapping_add(o[0])),
        Opcode::Sub => Some(|o| o[1].wrapping_sub(o[0])),
        Opcode::Mul => Some(|o| o[1].wrapping_mul(o[0])),
        Opcode::Div => Some(|o| if o[0].is_zero() { U256::ZERO } else { o[1] / o[0] }),
        Opcode::SDiv => Some(|o| signed_div(o[1], o[0])),
        Opcode::Mod => Some(|o| if o[0].is_zero() { U256::ZERO } else { o[1] % o[0] }),
        Opcode::SMod => Some(|o| signed_mod(o[1], o[0])),
        Opcode::Exp => Some(|o| o[1].pow(o[0])),
        Opcode::Eq => Some(|o| bool_lit(o[1] == o[0])),
        Opcode::Lt => Some(|o| bool_lit(o[1] < o[0])),
        Opcode::Gt => Some(|o| bool_lit(o[1] > o[0])),
        Opcode::Slt => Some(|o| bool_lit(signed_lt(o[1], o[0]))),
        Opcode::Sgt => Some(|o| bool_lit(signed_lt(o[0], o[1]))),
        Opcode::Or => Some(|o| o[1] | o[0]),
        Opcode::And => Some(|o| o[1] & o[0]),
        Opcode::Xor => Some(|o| o[1] ^ o[0]),
        Opcode::Not => Some(|o| !o[0]),
        Opcode::IsZero => Some(|o| bool_lit(o[0].is_zero())),
        Opcode::Shr => Some(|o| if o[1] >= U256::from(256u64) { U256::ZERO } else { o[0] >> o[1].to::<usize>() }),
        Opcode::Shl => Some(|o| if o[1] >= U256::from(256u64) { U256::ZERO } else { o[0] << o[1].to::<usize>() }),
        Opcode::Sar => Some(|o| {
            let shift = o[1];
            if shift >= U256::from(256u64) {
                if is_negative(o[0]) {
                    U256::MAX
                } else {
                    U256::ZERO
                }
            } else {
                let n = shift.to::<usize>();
                let shifted = o[0] >> n;
                if n > 0 && is_negative(o[0]) {
                    let fill = U256::MAX << (256 - n);
                    shifted | fill
                } else {
                    shifted
                }
            }
        }),
        _ => None,
    }
}

/// Two's-complement sign bit: bit 255.
fn is_negative(v: U256) -> bool {
    v.bit(255)
}

/// Two's-complement negation, matching `-v` for a 256-bit signed value.
fn negate(v: U256) -> U256 {
    (!v).wrapping_add(U256::from(1u64))
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let (neg_a, neg_b) = (is_negative(a), is_negative(b));
    let abs_a = if neg_a { negate(a) } else { a };
    let abs_b = if neg_b { negate(b) } else { b };
    let q = abs_a / abs_b;
    if neg_a != neg_b {
        negate(q)
    } else {
        q
    }
}

fn signed_mod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let neg_a = is_negative(a);
    let abs_a = if neg_a { negate(a) } else { a };
    let abs_b = if is_negative(b) { negate(b) } else { b };
    let r = abs_a % abs_b;
    if neg_a {
        negate(r)
    } else {
        r
    }
}

fn bool_lit(b: bool) -> U256 {
    if b {
        U256::from(1u64)
    } else {
        U256::ZERO
    }
}

fn propagate_constants(func: &mut Function, state: &mut State) -> VenomResult<()> {
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let count = func.try_get_block(&label)?.instructions.len();
        for idx in 0..count {
            let block = func.get_block_mut(&label).expect("label exists");
            let inst = &mut block.instructions[idx];
            match inst.opcode {
                Opcode::Jnz => {
                    if let Lattice::Const(v) = lattice_of(state, &inst.operands[0]) {
                        let target = if v.is_zero() { inst.operands[1].clone() } else { inst.operands[2].clone() };
                        inst.opcode = Opcode::Jmp;
                        inst.operands = vec![target];
                        state.cfg_dirty = true;
                    }
                }
                Opcode::Assert => {
                    if let Lattice::Const(v) = lattice_of(state, &inst.operands[0]) {
                        if v.is_zero() {
                            inst.make_nop();
                            state.cfg_dirty = true;
                        }
                    }
                }
                Opcode::Phi => continue,
                _ => {}
            }
            for op in inst.operands.iter_mut() {
                if let Operand::Variable(v) = op {
                    if let Lattice::Const(value) = *state.lattice.get(v).unwrap_or(&Lattice::Top) {
                        *op = Operand::Literal(value);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Collapse `store`-chains once lattice propagation is done: inline a
/// `store`'s source into every non-phi use and, if nothing but phis still
/// reference it, drop the `store` itself.
fn propagate_variables(func: &mut Function, _state: &mut State) -> VenomResult<bool> {
    let mut changed = false;
    for label in func.block_labels().cloned().collect::<Vec<_>>() {
        let store_defs: Vec<(usize, Variable, Operand)> = {
            let block = func.try_get_block(&label)?;
            block
                .instructions
                .iter()
                .enumerate()
                .filter(|(_, inst)| inst.opcode == Opcode::Store)
                .filter_map(|(idx, inst)| inst.output.clone().map(|out| (idx, out, inst.operands[0].clone())))
                .collect()
        };

        for (store_idx, out_var, src) in store_defs {
            let mut remove = true;
            for other_label in func.block_labels().cloned().collect::<Vec<_>>() {
                let block = func.get_block_mut(&other_label).expect("label exists");
                for inst in block.instructions.iter_mut() {
                    if inst.is_phi() {
                        if inst.input_variables().any(|v| *v == out_var) {
                            remove = false;
                        }
                        continue;
                    }
                    for op in inst.operands.iter_mut() {
                        if op.as_variable() == Some(&out_var) {
                            *op = src.clone();
                            changed = true;
                        }
                    }
                }
            }
            if remove {
                let block = func.get_block_mut(&label).expect("label exists");
                block.instructions[store_idx].make_nop();
                changed = true;
            }
        }
    }
    Ok(changed)
}
