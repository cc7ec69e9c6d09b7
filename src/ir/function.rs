//! [`Function`]: one Venom function — a set of basic blocks reachable from
//! a distinguished entry block, plus the counters used to mint fresh SSA
//! names.

use indexmap::IndexMap;

use super::basic_block::BasicBlock;
use super::operand::{Label, Variable};
use crate::errors::{VenomError, VenomResult};

#[derive(Clone, Debug)]
pub struct Function {
    pub name: Label,
    entry: Label,
    blocks: IndexMap<Label, BasicBlock>,
    next_variable: u32,
    next_label: u32,
}

impl Function {
    /// Create a function with a single empty entry block named `entry`.
    pub fn new(name: Label) -> Self {
        let entry = Label::new("entry");
        let mut blocks = IndexMap::new();
        blocks.insert(entry.clone(), BasicBlock::new(entry.clone()));
        Function { name, entry, blocks, next_variable: 0, next_label: 0 }
    }

    pub fn entry_label(&self) -> &Label {
        &self.entry
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[&self.entry]
    }

    pub fn entry_mut(&mut self) -> &mut BasicBlock {
        self.blocks.get_mut(&self.entry).expect("entry block always present")
    }

    /// Mint a fresh SSA variable scoped to this function, e.g. `%var123`.
    pub fn next_variable(&mut self) -> Variable {
        let v = Variable::new(format!("var{}", self.next_variable));
        self.next_variable += 1;
        v
    }

    /// Mint a fresh block label scoped to this function, e.g. `bb12`.
    pub fn next_label(&mut self, suffix: &str) -> Label {
        let l = Label::new(format!("{suffix}{}", self.next_label));
        self.next_label += 1;
        l
    }

    pub fn add_block(&mut self, block: BasicBlock) {
        self.blocks.insert(block.label.clone(), block);
    }

    pub fn remove_block(&mut self, label: &Label) -> Option<BasicBlock> {
        self.blocks.shift_remove(label)
    }

    /// Repoint which block is the entry, without touching `blocks`. Used by
    /// the parser, which learns the real entry label only after `new` has
    /// already set up the placeholder `entry` block.
    pub fn set_entry_label(&mut self, label: Label) {
        self.entry = label;
    }

    pub fn get_block(&self, label: &Label) -> Option<&BasicBlock> {
        self.blocks.get(label)
    }

    pub fn get_block_mut(&mut self, label: &Label) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(label)
    }

    pub fn try_get_block(&self, label: &Label) -> VenomResult<&BasicBlock> {
        self.blocks
            .get(label)
            .ok_or_else(|| VenomError::panic(format!("no such block {label}"), self.name.to_string()))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> + '_ {
        self.blocks.values()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut BasicBlock> + '_ {
        self.blocks.values_mut()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_labels(&self) -> impl Iterator<Item = &Label> + '_ {
        self.blocks.keys()
    }

    /// Link consecutive declared blocks' `cfg_in`/`cfg_out` for blocks that
    /// fall through without an explicit terminator yet (used right after
    /// parsing, before a real CFG pass runs).
    pub fn chain_basic_blocks(&mut self) {
        let order: Vec<Label> = self.blocks.keys().cloned().collect();
        for pair in order.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if !self.blocks[a].is_terminated() {
                self.blocks.get_mut(a).unwrap().add_cfg_out(b.clone());
                self.blocks.get_mut(b).unwrap().add_cfg_in(a.clone());
            }
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "function {} {{", self.name)?;
        for block in self.blocks.values() {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_variables_and_labels_are_unique() {
        let mut func = Function::new(Label::new("foo"));
        let a = func.next_variable();
        let b = func.next_variable();
        assert_ne!(a, b);
        let l0 = func.next_label("bb");
        let l1 = func.next_label("bb");
        assert_ne!(l0, l1);
    }

    #[test]
    fn new_function_has_entry_block() {
        let func = Function::new(Label::new("foo"));
        assert_eq!(func.block_count(), 1);
        assert_eq!(func.entry().label, *func.entry_label());
    }
}
