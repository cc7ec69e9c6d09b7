//! [`Context`]: a whole compilation unit — every function plus the
//! constructor-time data segments emitted alongside the code.

use std::fmt;

use indexmap::IndexMap;

use super::function::Function;
use super::operand::Label;

/// One entry in a [`DataSection`]: either a label reference (resolved to an
/// address by the assembler) or a raw byte blob.
#[derive(Clone, Debug)]
pub enum DataItem {
    LabelRef(Label),
    Bytes(Vec<u8>),
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::LabelRef(l) => write!(f, "@{l}"),
            DataItem::Bytes(b) => {
                write!(f, "x\"")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "\"")
            }
        }
    }
}

/// A named run of [`DataItem`]s, emitted verbatim into the constructor's
/// runtime-code data region (e.g. immutables, packed constants).
#[derive(Clone, Debug)]
pub struct DataSection {
    pub label: Label,
    pub items: Vec<DataItem>,
}

impl fmt::Display for DataSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dbsection {}:", self.label)?;
        for item in &self.items {
            writeln!(f, "    db {item}")?;
        }
        Ok(())
    }
}

/// A whole compilation unit: every function plus the data segments the
/// constructor writes out alongside runtime bytecode.
#[derive(Clone, Debug, Default)]
pub struct Context {
    functions: IndexMap<Label, Function>,
    entry_function: Option<Label>,
    pub data_segments: Vec<DataSection>,
    pub ctor_mem_size: u32,
    pub immutables_len: u32,
    next_label: u32,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn create_function(&mut self, name: Label) -> &mut Function {
        let is_first = self.functions.is_empty();
        let func = Function::new(name.clone());
        self.functions.insert(name.clone(), func);
        if is_first {
            self.entry_function = Some(name.clone());
        }
        self.functions.get_mut(&name).expect("just inserted")
    }

    pub fn add_function(&mut self, func: Function) {
        let is_first = self.functions.is_empty();
        let name = func.name.clone();
        self.functions.insert(name.clone(), func);
        if is_first {
            self.entry_function = Some(name);
        }
    }

    pub fn get_function(&self, name: &Label) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn get_function_mut(&mut self, name: &Label) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> + '_ {
        self.functions.values()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> + '_ {
        self.functions.values_mut()
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.entry_function.as_ref().and_then(|n| self.functions.get(n))
    }

    pub fn set_entry_function(&mut self, name: Label) {
        self.entry_function = Some(name);
    }

    /// Mint a module-global unique label, e.g. for a spiller-inserted
    /// `alloca` output or a synthetic block.
    pub fn next_label(&mut self, suffix: &str) -> Label {
        let l = Label::new(format!("{suffix}_{}", self.next_label));
        self.next_label += 1;
        l
    }

    pub fn append_data_section(&mut self, section: DataSection) {
        self.data_segments.push(section);
    }

    /// Render the call graph (which functions invoke which) as Graphviz
    /// `dot` source, for debugging only.
    pub fn to_graphviz(&self) -> String {
        let mut out = String::from("digraph call_graph {\n");
        for func in self.functions.values() {
            for block in func.blocks() {
                for inst in &block.instructions {
                    if inst.opcode == super::opcode::Opcode::Invoke {
                        if let Some(callee) = inst.label_operands().next() {
                            out.push_str(&format!("  \"{}\" -> \"{}\";\n", func.name, callee));
                        }
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.data_segments {
            write!(f, "{section}")?;
        }
        for func in self.functions.values() {
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_created_function_becomes_entry() {
        let mut ctx = Context::new();
        ctx.create_function(Label::new("main"));
        ctx.create_function(Label::new("helper"));
        assert_eq!(ctx.entry_function().unwrap().name, Label::new("main"));
    }

    #[test]
    fn context_labels_are_unique_across_functions() {
        let mut ctx = Context::new();
        let a = ctx.next_label("spill");
        let b = ctx.next_label("spill");
        assert_ne!(a, b);
    }
}
