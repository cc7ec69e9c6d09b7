//! Data-flow graph (spec §4.6): the def-use relation over SSA variables,
//! plus the "equivalent variables" chains (`store`/`assign` of one variable
//! to another) the stack spiller and algebraic pass both rely on.

use rustc_hash::{FxHashMap, FxHashSet};

use super::Analysis;
use crate::errors::{VenomError, VenomResult};
use crate::ir::{Function, Instruction, Label, Opcode, Variable};

/// A reference to one instruction: its owning block and index within it.
/// Stable only until the next structural edit of that block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstRef {
    pub block: usize,
    pub index: usize,
}

pub struct DataFlowGraph {
    block_order: Vec<Label>,
    producer: FxHashMap<Variable, InstRef>,
    uses: FxHashMap<Variable, Vec<InstRef>>,
    /// Union-find over variables linked by `store`/`assign`: `find(v)`
    /// gives a canonical representative for every variable in v's
    /// equivalence class.
    equiv_parent: FxHashMap<Variable, Variable>,
}

impl Analysis for DataFlowGraph {
    fn analyze(func: &mut Function) -> VenomResult<Self> {
        let block_order: Vec<Label> = func.block_labels().cloned().collect();
        let mut producer = FxHashMap::default();
        let mut uses: FxHashMap<Variable, Vec<InstRef>> = FxHashMap::default();
        let mut equiv_parent: FxHashMap<Variable, Variable> = FxHashMap::default();

        for (block_idx, label) in block_order.iter().enumerate() {
            let block = func.try_get_block(label)?;
            for (inst_idx, inst) in block.instructions.iter().enumerate() {
                let here = InstRef { block: block_idx, index: inst_idx };
                if let Some(out) = &inst.output {
                    if producer.insert(out.clone(), here).is_some() {
                        return Err(VenomError::panic(
                            format!("variable {out} produced by more than one instruction"),
                            inst.to_string(),
                        ));
                    }
                    equiv_parent.entry(out.clone()).or_insert_with(|| out.clone());
                }
                for v in inst.input_variables() {
                    uses.entry(v.clone()).or_default().push(here);
                    equiv_parent.entry(v.clone()).or_insert_with(|| v.clone());
                }
                if matches!(inst.opcode, Opcode::Store) {
                    if let (Some(out), Some(src)) =
                        (&inst.output, inst.operands.first().and_then(|o| o.as_variable()))
                    {
                        union(&mut equiv_parent, out, src);
                    }
                }
            }
        }

        Ok(DataFlowGraph { block_order, producer, uses, equiv_parent })
    }
}

fn find(parent: &mut FxHashMap<Variable, Variable>, v: &Variable) -> Variable {
    let p = parent.entry(v.clone()).or_insert_with(|| v.clone()).clone();
    if &p == v {
        return p;
    }
    let root = find(parent, &p);
    parent.insert(v.clone(), root.clone());
    root
}

fn union(parent: &mut FxHashMap<Variable, Variable>, a: &Variable, b: &Variable) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent.insert(ra, rb);
    }
}

impl DataFlowGraph {
    pub fn producer(&self, v: &Variable) -> Option<InstRef> {
        self.producer.get(v).copied()
    }

    pub fn uses(&self, v: &Variable) -> &[InstRef] {
        self.uses.get(v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resolve<'a>(&self, func: &'a Function, r: InstRef) -> Option<&'a Instruction> {
        let label = self.block_order.get(r.block)?;
        func.get_block(label)?.instructions.get(r.index)
    }

    /// Canonical representative of `v`'s `store`/`assign` equivalence
    /// class. Two variables with the same representative always hold the
    /// same value.
    pub fn equivalent_root(&self, v: &Variable) -> Variable {
        let mut parent = self.equiv_parent.clone();
        find(&mut parent, v)
    }

    pub fn are_equivalent(&self, a: &Variable, b: &Variable) -> bool {
        a == b || self.equivalent_root(a) == self.equivalent_root(b)
    }

    /// The closure of `uses` starting from `v`: every instruction reachable
    /// by following "is an input to" edges forward, including through any
    /// further variables those instructions produce. Used by dead-code
    /// elimination to decide whether removing one instruction cascades.
    pub fn get_transitive_uses(&self, func: &Function, v: &Variable) -> VenomResult<FxHashSet<InstRef>> {
        let mut seen_insts = FxHashSet::default();
        let mut queue: Vec<Variable> = vec![v.clone()];
        let mut visited_vars = FxHashSet::default();
        while let Some(cur) = queue.pop() {
            if !visited_vars.insert(cur.clone()) {
                continue;
            }
            for user in self.uses(&cur) {
                if seen_insts.insert(*user) {
                    if let Some(inst) = self.resolve(func, *user) {
                        if let Some(out) = &inst.output {
                            queue.push(out.clone());
                        }
                    }
                }
            }
        }
        Ok(seen_insts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Opcode, Operand};

    #[test]
    fn producer_and_uses_agree() {
        let mut func = Function::new(Label::new("f"));
        let x = Variable::new("x");
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(x.clone())));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Add,
            vec![Operand::from(x.clone()), Operand::literal(alloy_primitives::U256::from(1u64))],
            Some(Variable::new("y")),
        ));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let dfg = DataFlowGraph::analyze(&mut func).unwrap();
        assert_eq!(dfg.producer(&x), Some(InstRef { block: 0, index: 0 }));
        assert_eq!(dfg.uses(&x), &[InstRef { block: 0, index: 1 }]);
    }

    #[test]
    fn store_chain_creates_equivalence() {
        let mut func = Function::new(Label::new("f"));
        let a = Variable::new("a");
        let b = Variable::new("b");
        func.entry_mut().append_instruction(Instruction::new(Opcode::Param, vec![], Some(a.clone())));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Store, vec![Operand::from(a.clone())], Some(b.clone())));
        func.entry_mut().append_instruction(Instruction::new(Opcode::Stop, vec![], None));

        let dfg = DataFlowGraph::analyze(&mut func).unwrap();
        assert!(dfg.are_equivalent(&a, &b));
    }
}
