//! The closed opcode vocabulary (spec §3): EVM opcodes plus the IR's
//! pseudo-ops. Classification is implemented as methods on [`Opcode`],
//! mirroring `cranelift-codegen`'s `Opcode::is_call()`/`is_branch()` style
//! (`inst_predicates.rs`) rather than scattered lookup tables.

use std::fmt;
use std::str::FromStr;

macro_rules! opcodes {
    ( $( $variant:ident => $text:literal ),+ $(,)? ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $variant ),+
        }

        impl Opcode {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Opcode::$variant => $text ),+
                }
            }
        }

        impl FromStr for Opcode {
            type Err = ();
            fn from_str(s: &str) -> Result<Self, ()> {
                match s {
                    $( $text => Ok(Opcode::$variant), )+
                    _ => Err(()),
                }
            }
        }
    };
}

opcodes! {
    // Pseudo-ops.
    Store => "store",
    Phi => "phi",
    Param => "param",
    Nop => "nop",
    Offset => "offset",
    Alloca => "alloca",
    Palloca => "palloca",
    Calloca => "calloca",
    Invoke => "invoke",
    Ret => "ret",
    Sink => "sink",
    Db => "db",
    DbName => "dbname",

    // Terminators.
    Jmp => "jmp",
    DJmp => "djmp",
    Jnz => "jnz",
    Return => "return",
    Stop => "stop",
    Exit => "exit",

    // Arithmetic.
    Add => "add",
    Sub => "sub",
    Mul => "mul",
    Div => "div",
    SDiv => "sdiv",
    Mod => "mod",
    SMod => "smod",
    AddMod => "addmod",
    MulMod => "mulmod",
    Exp => "exp",
    SignExtend => "signextend",

    // Comparison / bitwise.
    Lt => "lt",
    Gt => "gt",
    Slt => "slt",
    Sgt => "sgt",
    Eq => "eq",
    IsZero => "iszero",
    And => "and",
    Or => "or",
    Xor => "xor",
    Not => "not",
    Shl => "shl",
    Shr => "shr",
    Sar => "sar",
    Byte => "byte",

    // Hashing.
    Sha3 => "sha3",

    // Environment.
    Address => "address",
    Balance => "balance",
    Origin => "origin",
    Caller => "caller",
    CallValue => "callvalue",
    CallDataLoad => "calldataload",
    CallDataSize => "calldatasize",
    CallDataCopy => "calldatacopy",
    CodeSize => "codesize",
    CodeCopy => "codecopy",
    GasPrice => "gasprice",
    ExtCodeSize => "extcodesize",
    ExtCodeCopy => "extcodecopy",
    ReturnDataSize => "returndatasize",
    ReturnDataCopy => "returndatacopy",
    ExtCodeHash => "extcodehash",
    BlockHash => "blockhash",
    CoinBase => "coinbase",
    Timestamp => "timestamp",
    Number => "number",
    PrevRandao => "prevrandao",
    GasLimit => "gaslimit",
    ChainId => "chainid",
    SelfBalance => "selfbalance",
    BaseFee => "basefee",
    BlobHash => "blobhash",
    BlobBaseFee => "blobbasefee",

    // Memory / storage / transient.
    MLoad => "mload",
    MStore => "mstore",
    MCopy => "mcopy",
    MSize => "msize",
    SLoad => "sload",
    SStore => "sstore",
    TLoad => "tload",
    TStore => "tstore",
    DLoad => "dload",
    DLoadBytes => "dloadbytes",

    // Calls / creation / control.
    Create => "create",
    Create2 => "create2",
    Call => "call",
    CallCode => "callcode",
    DelegateCall => "delegatecall",
    StaticCall => "staticcall",
    Invalid => "invalid",
    Revert => "revert",
    SelfDestruct => "selfdestruct",
    Gas => "gas",
    Pc => "pc",

    // Logs.
    Log0 => "log0",
    Log1 => "log1",
    Log2 => "log2",
    Log3 => "log3",
    Log4 => "log4",

    // Assertions (Venom-level, not raw EVM).
    Assert => "assert",
    AssertUnreachable => "assert_unreachable",
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Opcode {
    /// Instructions that transfer control out of their block; every basic
    /// block must end with exactly one.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::DJmp
                | Opcode::Jnz
                | Opcode::Ret
                | Opcode::Return
                | Opcode::Stop
                | Opcode::Exit
                | Opcode::Sink
        )
    }

    /// `jmp`/`djmp`/`jnz`: instructions whose operands alter the CFG.
    pub fn is_cfg_altering(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::DJmp | Opcode::Jnz)
    }

    /// Commutative binary opcodes: `flip()` just reverses operands.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Or | Opcode::Xor | Opcode::And | Opcode::Eq
        )
    }

    /// Opcodes in the signed/unsigned comparator family: flipping reverses
    /// operands *and* swaps opcode within the family (`gt` <-> `lt`).
    pub fn is_comparator(self) -> bool {
        matches!(self, Opcode::Gt | Opcode::Lt | Opcode::Sgt | Opcode::Slt)
    }

    pub fn is_flippable(self) -> bool {
        self.is_commutative() || self.is_comparator()
    }

    /// Flip a comparator within its signed/unsigned family: `gt<->lt`,
    /// `sgt<->slt`. Panics on anything else.
    pub fn flip_comparator(self) -> Opcode {
        match self {
            Opcode::Gt => Opcode::Lt,
            Opcode::Lt => Opcode::Gt,
            Opcode::Sgt => Opcode::Slt,
            Opcode::Slt => Opcode::Sgt,
            _ => unreachable!("flip_comparator called on non-comparator {self}"),
        }
    }

    /// `phi`/`param`: pseudo-instructions that must only appear at the
    /// start of a block and are never lowered to machine code directly.
    pub fn is_pseudo(self) -> bool {
        matches!(self, Opcode::Phi | Opcode::Param)
    }

    /// Instructions in `NO_OUTPUT`: must not have an output variable.
    pub fn has_no_output(self) -> bool {
        matches!(
            self,
            Opcode::MStore
                | Opcode::SStore
                | Opcode::TStore
                | Opcode::DLoadBytes
                | Opcode::CallDataCopy
                | Opcode::MCopy
                | Opcode::ReturnDataCopy
                | Opcode::CodeCopy
                | Opcode::ExtCodeCopy
                | Opcode::Return
                | Opcode::Ret
                | Opcode::Sink
                | Opcode::Revert
                | Opcode::Assert
                | Opcode::AssertUnreachable
                | Opcode::SelfDestruct
                | Opcode::Stop
                | Opcode::Invalid
                | Opcode::Invoke
                | Opcode::Jmp
                | Opcode::DJmp
                | Opcode::Jnz
                | Opcode::Log0
                | Opcode::Log1
                | Opcode::Log2
                | Opcode::Log3
                | Opcode::Log4
                | Opcode::Exit
        )
    }

    /// Volatile instructions: memory/storage/transient ops, external calls,
    /// logs, terminators. May not be reordered past each other except under
    /// alias-analysis guarantees.
    pub fn is_volatile(self) -> bool {
        self.has_no_output()
            || matches!(
                self,
                Opcode::Param
                    | Opcode::Call
                    | Opcode::CallCode
                    | Opcode::StaticCall
                    | Opcode::DelegateCall
                    | Opcode::Create
                    | Opcode::Create2
                    | Opcode::SLoad
                    | Opcode::TLoad
                    | Opcode::DLoad
                    | Opcode::MLoad
                    | Opcode::MCopy
                    | Opcode::CallDataCopy
                    | Opcode::ExtCodeCopy
                    | Opcode::ReturnDataCopy
                    | Opcode::CodeCopy
            )
    }

    pub fn is_log(self) -> bool {
        matches!(self, Opcode::Log0 | Opcode::Log1 | Opcode::Log2 | Opcode::Log3 | Opcode::Log4)
    }

    pub fn is_call_like(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::CallCode
                | Opcode::StaticCall
                | Opcode::DelegateCall
                | Opcode::Create
                | Opcode::Create2
                | Opcode::Invoke
        )
    }

    /// Reserved for testing only (`sink`); forbidden in production output.
    pub fn is_test_only(self) -> bool {
        matches!(self, Opcode::Sink)
    }

    /// Opcodes that never take an operand: pure environment/context reads,
    /// and pseudo- or terminator-ops with nothing to carry. Used by the
    /// textual parser to decide whether a statement has an operand list at
    /// all without guessing from the following token (`ret`'s genuinely
    /// variable 0-or-more arity is handled separately, since it's the one
    /// case arity alone can't settle).
    pub fn is_nullary(self) -> bool {
        matches!(
            self,
            Opcode::Param
                | Opcode::Nop
                | Opcode::Stop
                | Opcode::Exit
                | Opcode::Sink
                | Opcode::Invalid
                | Opcode::AssertUnreachable
                | Opcode::Gas
                | Opcode::Pc
                | Opcode::Address
                | Opcode::Origin
                | Opcode::Caller
                | Opcode::CallValue
                | Opcode::CallDataSize
                | Opcode::CodeSize
                | Opcode::GasPrice
                | Opcode::ReturnDataSize
                | Opcode::CoinBase
                | Opcode::Timestamp
                | Opcode::Number
                | Opcode::PrevRandao
                | Opcode::GasLimit
                | Opcode::ChainId
                | Opcode::SelfBalance
                | Opcode::BaseFee
                | Opcode::BlobBaseFee
                | Opcode::MSize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_text() {
        for op in [Opcode::Add, Opcode::Jnz, Opcode::Phi, Opcode::Sink, Opcode::DbName] {
            assert_eq!(Opcode::from_str(op.as_str()), Ok(op));
        }
    }

    #[test]
    fn nullary_opcodes_take_no_operand() {
        for op in [Opcode::Stop, Opcode::Gas, Opcode::Address, Opcode::MSize] {
            assert!(op.is_nullary());
        }
        for op in [Opcode::Add, Opcode::Jnz, Opcode::Return, Opcode::Mul] {
            assert!(!op.is_nullary());
        }
    }

    #[test]
    fn comparator_flip_stays_in_family() {
        assert_eq!(Opcode::Gt.flip_comparator(), Opcode::Lt);
        assert_eq!(Opcode::Sgt.flip_comparator(), Opcode::Slt);
    }

    #[test]
    fn no_output_subset_of_volatile() {
        // spec invariant: NO_OUTPUT_INSTRUCTIONS subset of VOLATILE.
        for op in [Opcode::MStore, Opcode::Jmp, Opcode::Return, Opcode::Log1] {
            assert!(op.has_no_output());
            assert!(op.is_volatile());
        }
    }
}
