//! [`Operand`]: the polymorphic value used as an instruction input (spec §3).

use std::fmt;
use std::rc::Rc;

use alloy_primitives::U256;

/// An SSA variable, optionally versioned.
///
/// Two variables are equal iff their base name and version match. The base
/// name never includes the leading `%` or the `:version` suffix; those are
/// purely textual-form concerns handled by the parser/printer.
#[derive(Clone, Debug, Eq)]
pub struct Variable {
    name: Rc<str>,
    version: u32,
}

impl Variable {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Variable { name: name.into(), version: 0 }
    }

    pub fn versioned(name: impl Into<Rc<str>>, version: u32) -> Self {
        Variable { name: name.into(), version }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns a copy of this variable bumped to a new SSA version.
    pub fn with_version(&self, version: u32) -> Self {
        Variable { name: self.name.clone(), version }
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.name == other.name
    }
}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)?;
        if self.version > 0 {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

/// A symbolic label: a jump target, function name, or data-section name.
///
/// `is_symbol` marks labels that originated in the front end and must be
/// preserved verbatim through optimization (function names, data-section
/// names) rather than being treated as fair game for renaming/merging.
/// It does not participate in equality or hashing: two labels are the same
/// label iff their names match, regardless of provenance.
#[derive(Clone, Debug, Eq)]
pub struct Label {
    name: Rc<str>,
    pub is_symbol: bool,
}

impl Label {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Label { name: name.into(), is_symbol: false }
    }

    pub fn symbol(name: impl Into<Rc<str>>) -> Self {
        Label { name: name.into(), is_symbol: true }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::hash::Hash for Label {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_plain_ident = !self.name.is_empty()
            && self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_plain_ident {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{:?}", self.name.as_ref())
        }
    }
}

/// An instruction operand: exactly one of a literal, a variable, or a label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Literal(U256),
    Variable(Variable),
    Label(Label),
}

impl Operand {
    pub fn literal(v: impl Into<U256>) -> Self {
        Operand::Literal(v.into())
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Operand::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&Label> {
        match self {
            Operand::Label(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<U256> {
        match self {
            Operand::Literal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Operand::Variable(_))
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Operand::Label(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Operand::Literal(_))
    }
}

impl From<U256> for Operand {
    fn from(v: U256) -> Self {
        Operand::Literal(v)
    }
}

impl From<u64> for Operand {
    fn from(v: u64) -> Self {
        Operand::Literal(U256::from(v))
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Variable(v)
    }
}

impl From<Label> for Operand {
    fn from(v: Label) -> Self {
        Operand::Label(v)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Variable(v) => write!(f, "{v}"),
            Operand::Label(l) => write!(f, "@{l}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_equality_ignores_display_only_fields() {
        let a = Variable::versioned("x", 2);
        let b = Variable::versioned("x", 2);
        let c = Variable::versioned("x", 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn label_equality_ignores_is_symbol() {
        let a = Label::new("foo");
        let b = Label::symbol("foo");
        assert_eq!(a, b);
    }

    #[test]
    fn literal_wraps_raw_integers() {
        let op: Operand = 42u64.into();
        assert_eq!(op.as_literal(), Some(U256::from(42)));
    }
}
