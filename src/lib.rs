//! SSA intermediate representation and stack-machine code generator for a
//! smart-contract compiler middle-end.
//!
//! The pipeline a caller drives end to end:
//!
//! 1. [`parser::parse_context`] (or [`builder::Builder`] directly) produces
//!    a [`ir::Context`] of [`ir::Function`]s.
//! 2. [`ssa::make_ssa`] establishes SSA form.
//! 3. [`passes::run_default_pipeline`] optimizes each function to a fixed
//!    point, memoizing analyses through an [`analysis::AnalysesCache`].
//! 4. [`codegen::assemble`] normalizes and lowers each function to a flat
//!    [`stack::Asm`] stream.
//! 5. [`printer::print_context`] renders IR back to text for inspection or
//!    round-tripping; `Asm` itself is rendered by a downstream assembler.

pub mod analysis;
pub mod builder;
pub mod codegen;
pub mod entity;
pub mod errors;
pub mod ir;
pub mod parser;
pub mod passes;
pub mod printer;
pub mod ssa;
pub mod stack;

pub mod config;

pub use analysis::AnalysesCache;
pub use builder::Builder;
pub use codegen::assemble;
pub use config::TargetConfig;
pub use errors::{VenomError, VenomResult};
pub use ir::{BasicBlock, Context, Function, Instruction, Label, Opcode, Operand, Variable};
pub use stack::Asm;
