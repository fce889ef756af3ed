//! The flat, word-addressable memory image and its reserved layout.

use crate::cell::Cell;
use crate::error::{EngineError, VmResult};

/// Total number of addressable words.
pub const MEM_SIZE: usize = 20_000;

/// Memory-mapped registers: program counter.
pub const REG_PC: usize = 0;
/// Memory-mapped registers: stack pointer.
pub const REG_SP: usize = 1;
/// Memory-mapped registers: result of the last syscall/fault trap.
pub const REG_SYSCALL_RESULT: usize = 2;
/// Memory-mapped registers: monotonically increasing executed-instruction count.
pub const REG_INSTR_COUNT: usize = 3;

/// Cell holding the return PC saved by the most recent syscall trap.
pub const SYSCALL_RETURN_PC: usize = 18;

/// First address of the kernel-only region (inclusive).
pub const KERNEL_REGION_START: usize = 21;
/// Last address of the kernel-only region (inclusive).
pub const KERNEL_REGION_END: usize = 999;

/// Entry point of the common fault/syscall kernel handler.
pub const KERNEL_TRAP_ENTRY: i64 = 380;

/// First address of the thread-descriptor table.
pub const THREAD_TABLE_BASE: usize = 30;
/// Words occupied by each thread descriptor.
pub const THREAD_SLOT_SIZE: usize = 10;
/// Maximum number of thread-descriptor slots.
pub const MAX_THREADS: usize = 10;

/// Returns `true` if `addr` falls in the kernel-only region `[21, 999]`
/// that user mode may never touch.
#[inline]
pub fn is_kernel_only(addr: i64) -> bool {
    (KERNEL_REGION_START as i64..=KERNEL_REGION_END as i64).contains(&addr)
}

/// The simulated memory array.
///
/// This is the single source of truth: the register shadow kept by
/// [`crate::registers::Registers`] is always reconciled from these cells at
/// well-defined points, never the other way around.
#[derive(Debug, Clone)]
pub struct Memory {
    cells: Vec<Cell>,
}

impl Memory {
    /// Creates a fresh, zero-filled memory image of [`MEM_SIZE`] words.
    pub fn new() -> Self {
        Self {
            cells: vec![Cell::default(); MEM_SIZE],
        }
    }

    /// Validates that `addr` lies in `[0, MEM_SIZE)`. This is the engine-error
    /// check, distinct from (and performed before) any privilege check.
    fn validate(addr: i64) -> VmResult<usize> {
        if addr < 0 || addr as usize >= MEM_SIZE {
            return Err(EngineError::AddressOutOfRange { addr });
        }
        Ok(addr as usize)
    }

    /// Raw, unchecked read of a cell by `usize` index. Intended for internal
    /// callers (debug dumps, the thread-table printer) that already know the
    /// index is in range.
    pub fn cell(&self, addr: usize) -> &Cell {
        &self.cells[addr]
    }

    /// Returns every `(address, cell)` pair whose cell is not the default
    /// zero integer, in address order. Used by the memory dump.
    pub fn nonzero_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c != Cell::Int(0))
    }

    /// Reads the raw [`Cell`] at `addr`, range-checked.
    pub fn read_cell(&self, addr: i64) -> VmResult<&Cell> {
        let idx = Self::validate(addr)?;
        Ok(&self.cells[idx])
    }

    /// Reads the integer at `addr`, range- and type-checked.
    pub fn read_int(&self, addr: i64) -> VmResult<i64> {
        let idx = Self::validate(addr)?;
        self.cells[idx]
            .as_int()
            .ok_or(EngineError::NotAnInteger { addr })
    }

    /// Writes an integer to `addr`, range-checked.
    pub fn write_int(&mut self, addr: i64, value: i64) -> VmResult<()> {
        let idx = Self::validate(addr)?;
        self.cells[idx] = Cell::Int(value);
        Ok(())
    }

    /// Writes a raw [`Cell`] to `addr`, range-checked. Used by the loader to
    /// place string literals.
    pub fn write_cell(&mut self, addr: i64, cell: Cell) -> VmResult<()> {
        let idx = Self::validate(addr)?;
        self.cells[idx] = cell;
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
