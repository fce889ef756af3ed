//! The closed instruction set.
//!
//! The reference this crate is based on dispatched opcodes dynamically, by
//! looking up a method named `op_<MNEMONIC>` at every fetch. Here, decoding
//! happens once, in the loader, into this exhaustive enum; the execution
//! loop's `match` is then checked by the compiler, not by a runtime
//! attribute lookup. An unrecognized mnemonic can therefore only ever arise
//! while parsing source text (see [`crate::error::LoaderWarning`]) — it is a
//! loader concern, not a runtime one.

use std::collections::HashMap;
use std::fmt;

/// The three software-interrupt kinds a `SYSCALL` instruction may name.
///
/// `Prn` carries the address of the cell to print; `Yield` and `Hlt` take no
/// operand. Modeling the operand this way (rather than a separate
/// `Option<i64>` alongside the kind) makes "PRN with no address" unrepresentable,
/// so the engine never has to fall back to a panic or a synthesized error for
/// a state the type system can rule out up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallKind {
    /// Print the value at the given address and continue the calling thread.
    Prn(i64),
    /// Cooperatively yield to the kernel scheduler.
    Yield,
    /// Terminate the calling thread (or, for thread 0, the whole machine).
    Hlt,
}

impl fmt::Display for SyscallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallKind::Prn(_) => write!(f, "PRN"),
            SyscallKind::Yield => write!(f, "YIELD"),
            SyscallKind::Hlt => write!(f, "HLT"),
        }
    }
}

/// A single decoded instruction: opcode plus its (fixed-arity) operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// `SET B A` — memory\[A\] ← B; if A == 0 this is also a jump.
    Set { value: i64, addr: i64 },
    /// `CPY S D` — memory\[D\] ← memory\[S\].
    Cpy { src: i64, dst: i64 },
    /// `CPYI S D` — memory\[D\] ← memory\[memory\[S\]\].
    CpyIndirect { src: i64, dst: i64 },
    /// `CPYI2 S D` — memory\[memory\[D\]\] ← memory\[memory\[S\]\], with an
    /// implicit jump when the destination pointer is cell 0.
    CpyIndirect2 { src: i64, dst: i64 },
    /// `ADD A K` — memory\[A\] ← memory\[A\] + K (K is an immediate).
    Add { addr: i64, imm: i64 },
    /// `ADDI D S` — memory\[D\] ← memory\[D\] + memory\[S\].
    AddIndirect { dst: i64, src: i64 },
    /// `SUBI S D` — memory\[D\] ← memory\[S\] − memory\[D\].
    SubIndirect { src: i64, dst: i64 },
    /// `JIF A T` — branch to T when memory\[A\] ≤ 0, else fall through.
    Jif { cond_addr: i64, target: i64 },
    /// `PUSH A` — push the literal operand value (not memory\[A\]).
    Push { value: i64 },
    /// `POP D` — pop into memory\[D\].
    Pop { dst: i64 },
    /// `CALL T` — push the return address and jump to T.
    Call { target: i64 },
    /// `RET` — pop the return address and jump to it.
    Ret,
    /// `HLT` — halt the machine (tid 0) or signal thread exit (tid ≠ 0).
    Hlt,
    /// `USER A` — switch to user mode and jump through memory\[A\].
    User { addr: i64 },
    /// `SYSCALL kind [A]` — software-interrupt trap into the kernel.
    Syscall { kind: SyscallKind },
}

impl Opcode {
    /// The mnemonic this opcode decodes from, for diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Set { .. } => "SET",
            Opcode::Cpy { .. } => "CPY",
            Opcode::CpyIndirect { .. } => "CPYI",
            Opcode::CpyIndirect2 { .. } => "CPYI2",
            Opcode::Add { .. } => "ADD",
            Opcode::AddIndirect { .. } => "ADDI",
            Opcode::SubIndirect { .. } => "SUBI",
            Opcode::Jif { .. } => "JIF",
            Opcode::Push { .. } => "PUSH",
            Opcode::Pop { .. } => "POP",
            Opcode::Call { .. } => "CALL",
            Opcode::Ret => "RET",
            Opcode::Hlt => "HLT",
            Opcode::User { .. } => "USER",
            Opcode::Syscall { .. } => "SYSCALL",
        }
    }

    /// Whether the execution loop should auto-advance PC by one after
    /// dispatching this opcode. `CALL`, `RET` and `JIF` manage PC themselves;
    /// so does `USER`, which jumps to its entry point rather than falling
    /// through to the next address. `SYSCALL` is handled entirely outside
    /// the normal dispatch path.
    pub fn manages_own_pc(&self) -> bool {
        matches!(
            self,
            Opcode::Call { .. } | Opcode::Ret | Opcode::Jif { .. } | Opcode::User { .. }
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Address → decoded-instruction mapping, separate from data memory
/// (Harvard-style). A missing entry decodes as `HLT` at fetch time.
pub type InstructionStore = HashMap<i64, Opcode>;
