//! Crate-wide error handling.
//!
//! Mirrors the distinction the specification draws between conditions the
//! engine recovers from on its own (protection faults, decode misses — these
//! never reach this type) and conditions that indicate a mis-authored program
//! image, which are fatal and therefore returned as `Err`.

use std::fmt;

/// Result alias used throughout the engine and loader.
pub type VmResult<T> = Result<T, EngineError>;

/// A fatal, non-recoverable engine condition.
///
/// Unlike a protection fault (handled internally by trapping into the kernel
/// entry point) an `EngineError` always stops the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// An address used by some instruction (directly or after indirection)
    /// fell outside `[0, MEM_SIZE)`.
    AddressOutOfRange {
        /// The offending address.
        addr: i64,
    },
    /// An arithmetic or control-flow opcode read a memory cell holding
    /// [`crate::cell::Cell::Text`] where an integer was required.
    NotAnInteger {
        /// The address whose contents were not an integer.
        addr: i64,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AddressOutOfRange { addr } => {
                write!(f, "address {addr} is outside the valid range [0, {})", crate::memory::MEM_SIZE)
            }
            EngineError::NotAnInteger { addr } => {
                write!(f, "memory[{addr}] does not hold an integer")
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// A non-fatal issue noticed while parsing a textual program image.
///
/// The loader collects these instead of aborting the parse; see
/// [`crate::loader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderWarning {
    /// A data line's value token was neither an integer nor a quoted string.
    UnparsableData {
        /// 1-based source line number.
        line: usize,
        /// The raw line text, for diagnostics.
        text: String,
    },
    /// An instruction line named a mnemonic outside the fixed opcode table.
    UnknownOpcode {
        /// 1-based source line number.
        line: usize,
        /// The unrecognized mnemonic.
        mnemonic: String,
    },
    /// An instruction line named a known mnemonic with the wrong operand count.
    ArityMismatch {
        /// 1-based source line number.
        line: usize,
        /// The mnemonic whose operands didn't line up.
        mnemonic: String,
    },
}

impl fmt::Display for LoaderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderWarning::UnparsableData { line, text } => {
                write!(f, "line {line}: unparsable data value, cell left at 0: {text:?}")
            }
            LoaderWarning::UnknownOpcode { line, mnemonic } => {
                write!(f, "line {line}: unknown opcode {mnemonic:?}, address left undecoded")
            }
            LoaderWarning::ArityMismatch { line, mnemonic } => {
                write!(f, "line {line}: wrong operand count for {mnemonic}, address left undecoded")
            }
        }
    }
}
