//! Dominator tree and dominance frontier (spec §4.4, second half).
//!
//! The iterative algorithm is Cooper, Harvey & Kennedy's "A Simple, Fast
//! Dominance Algorithm": a reverse-postorder fixed point using a two-finger
//! walk up the (partially built) idom chain, the same shape
//! `cranelift-codegen`'s `dominator_tree.rs` uses (there expressed over
//! dense `Inst`/`Block` entity references; here over `Label`s since this
//! core has no entity-ref block index of its own).

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use super::{cfg, Analysis};
use crate::errors::VenomResult;
use crate::ir::{Function, Label};

pub struct DominatorTree {
    /// Reverse postorder, entry first. Also the order new blocks should be
    /// visited in for any forward dataflow pass.
    rpo: Vec<Label>,
    postorder_number: FxHashMap<Label, usize>,
    idom: FxHashMap<Label, Label>,
    frontier: FxHashMap<Label, IndexSet<Label>>,
    children: FxHashMap<Label, Vec<Label>>,
}

impl Analysis for DominatorTree {
    fn analyze(func: &mut Function) -> VenomResult<Self> {
        cfg::calculate_cfg(func)?;

        let entry = func.entry_label().clone();
        let mut visited = IndexSet::new();
        let mut postorder = Vec::new();
        dfs_postorder(func, &entry, &mut visited, &mut postorder);

        let postorder_number: FxHashMap<Label, usize> =
            postorder.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();
        let rpo: Vec<Label> = postorder.iter().rev().cloned().collect();

        let mut idom: FxHashMap<Label, Label> = FxHashMap::default();
        idom.insert(entry.clone(), entry.clone());

        let mut changed = true;
        while changed {
            changed = false;
            for b in rpo.iter().skip(1) {
                let block = func.try_get_block(b)?;
                let mut processed_preds = block.cfg_in.iter().filter(|p| idom.contains_key(*p));
                let Some(first) = processed_preds.next() else { continue };
                let mut new_idom = first.clone();
                for p in processed_preds {
                    new_idom = intersect(&new_idom, p, &idom, &postorder_number);
                }
                if idom.get(b) != Some(&new_idom) {
                    idom.insert(b.clone(), new_idom);
                    changed = true;
                }
            }
        }

        let frontier = compute_dominance_frontier(func, &idom, &rpo)?;

        let mut children: FxHashMap<Label, Vec<Label>> = FxHashMap::default();
        for (b, idom_of_b) in &idom {
            if b != idom_of_b {
                children.entry(idom_of_b.clone()).or_default().push(b.clone());
            }
        }

        Ok(DominatorTree { rpo, postorder_number, idom, frontier, children })
    }
}

fn dfs_postorder(func: &Function, start: &Label, visited: &mut IndexSet<Label>, order: &mut Vec<Label>) {
    if !visited.insert(start.clone()) {
        return;
    }
    if let Some(block) = func.get_block(start) {
        for succ in &block.cfg_out {
            dfs_postorder(func, succ, visited, order);
        }
    }
    order.push(start.clone());
}

fn intersect(a: &Label, b: &Label, idom: &FxHashMap<Label, Label>, num: &FxHashMap<Label, usize>) -> Label {
    let mut finger1 = a.clone();
    let mut finger2 = b.clone();
    while finger1 != finger2 {
        while num[&finger1] < num[&finger2] {
            finger1 = idom[&finger1].clone();
        }
        while num[&finger2] < num[&finger1] {
            finger2 = idom[&finger2].clone();
        }
    }
    finger1
}

/// The classic "runner" algorithm: for every join point (>=2 predecessors),
/// walk each predecessor's idom chain up to (but not including) the join's
/// own immediate dominator, marking the join as being in each visited
/// block's frontier.
fn compute_dominance_frontier(
    func: &Function,
    idom: &FxHashMap<Label, Label>,
    rpo: &[Label],
) -> VenomResult<FxHashMap<Label, IndexSet<Label>>> {
    let mut frontier: FxHashMap<Label, IndexSet<Label>> =
        rpo.iter().map(|l| (l.clone(), IndexSet::new())).collect();

    for b in rpo {
        let block = func.try_get_block(b)?;
        if block.cfg_in.len() < 2 {
            continue;
        }
        let stop = match idom.get(b) {
            Some(s) => s.clone(),
            None => continue,
        };
        for pred in &block.cfg_in {
            if !idom.contains_key(pred) {
                continue; // unreachable predecessor, no idom chain to walk
            }
            let mut runner = pred.clone();
            while runner != stop {
                frontier.get_mut(&runner).expect("runner always reachable").insert(b.clone());
                runner = idom[&runner].clone();
            }
        }
    }
    Ok(frontier)
}

impl DominatorTree {
    /// Reverse postorder over reachable blocks, entry first.
    pub fn reverse_postorder(&self) -> &[Label] {
        &self.rpo
    }

    pub fn is_reachable(&self, label: &Label) -> bool {
        self.postorder_number.contains_key(label)
    }

    pub fn immediate_dominator(&self, label: &Label) -> Option<&Label> {
        self.idom.get(label)
    }

    /// `true` iff every path from the entry to `b` passes through `a`,
    /// counting `a` as dominating itself.
    pub fn dominates(&self, a: &Label, b: &Label) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b.clone();
        loop {
            if &cur == a {
                return true;
            }
            let next = match self.idom.get(&cur) {
                Some(n) => n.clone(),
                None => return false,
            };
            if next == cur {
                return false; // reached entry without finding a
            }
            cur = next;
        }
    }

    pub fn strictly_dominates(&self, a: &Label, b: &Label) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn dominance_frontier(&self, label: &Label) -> Option<&IndexSet<Label>> {
        self.frontier.get(label)
    }

    /// Children of `label` in the dominator tree (blocks it immediately
    /// dominates), in no particular order.
    pub fn children(&self, label: &Label) -> &[Label] {
        self.children.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Render the idom relation as Graphviz `dot` source, for debugging.
    pub fn to_graphviz(&self) -> String {
        let mut out = String::from("digraph dominator_tree {\n");
        for (b, idom) in &self.idom {
            if b != idom {
                out.push_str(&format!("  \"{idom}\" -> \"{b}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, Opcode, Operand};

    /// Diamond: entry -> {left, right} -> join.
    fn diamond() -> Function {
        let mut func = Function::new(Label::new("f"));
        func.entry_mut().append_instruction(Instruction::new(
            Opcode::Jnz,
            vec![
                Operand::literal(alloy_primitives::U256::from(1u64)),
                Operand::from(Label::new("left")),
                Operand::from(Label::new("right")),
            ],
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
        func
    }

    #[test]
    fn entry_dominates_everything_in_diamond() {
        let mut func = diamond();
        let tree = DominatorTree::analyze(&mut func).unwrap();
        let entry = func.entry_label().clone();
        assert!(tree.dominates(&entry, &Label::new("left")));
        assert!(tree.dominates(&entry, &Label::new("join")));
        assert!(!tree.dominates(&Label::new("left"), &Label::new("join")));
    }

    #[test]
    fn join_block_is_its_own_dominance_frontier_target() {
        let mut func = diamond();
        let tree = DominatorTree::analyze(&mut func).unwrap();
        let left_df = tree.dominance_frontier(&Label::new("left")).unwrap();
        assert!(left_df.contains(&Label::new("join")));
        let right_df = tree.dominance_frontier(&Label::new("right")).unwrap();
        assert!(right_df.contains(&Label::new("join")));
    }

    #[test]
    fn immediate_dominator_of_join_is_entry() {
        let mut func = diamond();
        let tree = DominatorTree::analyze(&mut func).unwrap();
        assert_eq!(tree.immediate_dominator(&Label::new("join")), Some(func.entry_label()));
    }
}
