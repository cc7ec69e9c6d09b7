//! The stack scheduling layer (spec §4.10-4.11): bridges SSA values, which
//! have no notion of position, and the stack machine's positional operands.
//! [`model::StackModel`] tracks what's where; [`spiller::StackSpiller`]
//! keeps every access within native `SWAPk`/`DUPk` reach by spilling to
//! scratch memory when it isn't.

pub mod model;
pub mod spiller;

pub use model::StackModel;
pub use spiller::{Asm, StackSpiller};
