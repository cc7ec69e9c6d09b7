//! Error kinds propagated out of the core (spec §7).
//!
//! Errors are never swallowed by a pass: every fallible entry point returns
//! `Result<_, VenomError>` and propagates with `?` up to the compilation
//! driver. Truly-impossible internal states (an index out of the bounds we
//! ourselves maintain) still use `unreachable!`, matching
//! `cranelift-codegen`'s own use of `debug_assert!`/`unreachable!` for
//! invariants the type system can't express.

use std::fmt;

use thiserror::Error;

/// Source location of a diagnostic: either a line/column in the textual IR,
/// or a line number traceable back through an AST backref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "<unknown location>")
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Everything that can go wrong compiling or manipulating Venom IR.
#[derive(Debug, Error)]
pub enum VenomError {
    /// An invariant of the IR was violated: malformed input, a use with no
    /// producer, a block with no terminator. Not recoverable; the caller
    /// should treat this as a compiler bug, not a user error.
    #[error("compiler panic: {message} (in instruction: {instruction})")]
    CompilerPanic { message: String, instruction: String },

    /// SCCP or the algebraic pass proved an `assert`/`assert_unreachable`
    /// must fail at runtime.
    #[error("{location}: static assertion failure: {message}")]
    StaticAssertion { message: String, location: Location },

    /// The spiller could not resolve a swap/dup even with memory spills.
    #[error("stack too deep: {message} (instruction: {instruction})")]
    StackTooDeep { message: String, instruction: String },

    /// The textual IR did not match the grammar.
    #[error("{location}: parse error: {message}")]
    Parse { message: String, location: Location },

    /// Literal folding produced a value outside the 256-bit range the
    /// surrounding type demanded.
    #[error("overflow: {message}")]
    Overflow { message: String },
}

impl VenomError {
    pub fn panic(message: impl Into<String>, instruction: impl fmt::Display) -> Self {
        VenomError::CompilerPanic { message: message.into(), instruction: instruction.to_string() }
    }

    pub fn stack_too_deep(message: impl Into<String>, instruction: impl fmt::Display) -> Self {
        VenomError::StackTooDeep {
            message: message.into(),
            instruction: instruction.to_string(),
        }
    }

    pub fn parse(message: impl Into<String>, location: Location) -> Self {
        VenomError::Parse { message: message.into(), location }
    }
}

pub type VenomResult<T> = Result<T, VenomError>;

/// Build a [`VenomError::Parse`] from a `format!`-style message, mirroring
/// `cranelift-reader/src/error.rs`'s `err!` macro.
macro_rules! parse_err {
    ($loc:expr, $msg:expr) => {
        return Err($crate::errors::VenomError::parse($msg.to_string(), $loc))
    };
    ($loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        return Err($crate::errors::VenomError::parse(format!($fmt, $($arg),+), $loc))
    };
}
pub(crate) use parse_err;
