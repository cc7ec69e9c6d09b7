//! Target parameters for the stack machine this core compiles to.
//!
//! Cranelift threads a `Flags`/`TargetIsa` settings object through codegen
//! instead of hardcoding constants (`isa::TargetIsa`); this is the same
//! idea cut down to the single fixed target this core addresses; there is
//! no multi-ISA dispatch, so one small struct suffices in place of
//! Cranelift's settings-group machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    /// Deepest stack slot directly addressable by a native `SWAPk`/`DUPk`
    /// (`k` from 1 to this value).
    pub stack_limit: u32,
    /// Width of a stack word / scratch memory word, in bits.
    pub word_bits: u32,
    /// Size of one spill slot in scratch memory, in bytes.
    pub spill_slot_size: u32,
    /// Byte offset in scratch memory where the spill region begins.
    pub spill_region_base: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            stack_limit: 16,
            word_bits: 256,
            spill_slot_size: 32,
            // Conventionally reserved for free variables / scratch by the
            // front end; spill slots are packed above it.
            spill_region_base: 0x0180,
        }
    }
}
