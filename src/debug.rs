//! Debug dump formats and the external single-step suspension point.
//!
//! These are deliberately *not* routed through the `log` facade: their exact
//! textual shape is part of the observable contract the specification
//! describes, and must not shift with `RUST_LOG` configuration the way the
//! crate's internal diagnostic logging may.

use std::io::{self, BufRead, Write};

use crate::memory::{Memory, THREAD_SLOT_SIZE, THREAD_TABLE_BASE};

/// How verbose the run loop's debug output should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    /// Dump memory once, after the machine halts.
    FinalDumpOnly,
    /// Dump memory after every executed instruction.
    EveryCycle,
    /// Dump memory after every instruction and wait for an external step
    /// signal before continuing.
    Step,
    /// Dump the thread table after every `SYSCALL`.
    ThreadTable,
}

impl DebugLevel {
    /// Parses the `-D` CLI flag's numeric argument.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(DebugLevel::FinalDumpOnly),
            1 => Some(DebugLevel::EveryCycle),
            2 => Some(DebugLevel::Step),
            3 => Some(DebugLevel::ThreadTable),
            _ => None,
        }
    }
}

/// A source of "continue to the next instruction" signals for debug level 2.
///
/// This is the run loop's only suspension point (§5 of the specification);
/// everything else about execution is synchronous.
pub trait StepGate {
    /// Blocks until the caller should proceed to the next instruction.
    fn wait_for_step(&mut self);
}

/// Waits for a line on standard input before each step, matching the
/// reference implementation's `input("Press ENTER to step")`.
pub struct StdinStepGate;

impl StepGate for StdinStepGate {
    fn wait_for_step(&mut self) {
        eprint!("Press ENTER to step");
        let _ = io::stderr().flush();
        let mut discard = String::new();
        let _ = io::stdin().lock().read_line(&mut discard);
    }
}

/// A step gate that never blocks, for tests and embeddings that drive the
/// engine programmatically.
pub struct NoWaitStepGate;

impl StepGate for NoWaitStepGate {
    fn wait_for_step(&mut self) {}
}

/// Prints every non-zero memory cell, one `addr: value` line per cell, to
/// standard error.
pub fn print_memory(mem: &Memory) {
    for (addr, cell) in mem.nonzero_cells() {
        eprintln!("{addr}: {cell}");
    }
}

/// Pretty-prints the fixed-size thread-descriptor table (addresses
/// `30..136`) to standard error.
pub fn print_thread_table(mem: &Memory) {
    const HEADERS: [&str; 7] = [
        "ID",
        "STATE",
        "PC",
        "SP",
        "STARTING TIME",
        "PRN SYSCALL",
        "CPU/INST",
    ];
    const COL_WIDTH: usize = 15;

    let header_line = HEADERS
        .iter()
        .map(|h| format!("{h:>COL_WIDTH$}"))
        .collect::<Vec<_>>()
        .join(" | ");
    let sep_line = vec!["-".repeat(COL_WIDTH); HEADERS.len()].join("-+-");

    eprintln!();
    eprintln!("Thread Table:");
    eprintln!("{header_line}");
    eprintln!("{sep_line}");

    let table_end = THREAD_TABLE_BASE + THREAD_SLOT_SIZE * crate::memory::MAX_THREADS;
    for slot in (THREAD_TABLE_BASE..table_end).step_by(THREAD_SLOT_SIZE) {
        let row = (0..7)
            .map(|off| mem.cell(slot + off).to_string())
            .map(|v| format!("{v:>COL_WIDTH$}"))
            .collect::<Vec<_>>()
            .join(" | ");
        eprintln!("{row}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_level_accepts_only_0_through_3() {
        assert_eq!(DebugLevel::from_level(0), Some(DebugLevel::FinalDumpOnly));
        assert_eq!(DebugLevel::from_level(3), Some(DebugLevel::ThreadTable));
        assert_eq!(DebugLevel::from_level(4), None);
    }
}
