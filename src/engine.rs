//! The fetch/decode/execute loop and every instruction handler.
//!
//! Memory is the single source of truth (see [`crate::registers`]); every
//! handler below funnels its reads and writes through [`Cpu::check_access`]
//! so the privilege rule lives in exactly one place.

use log::{error, info};
#[cfg(feature = "instr_trace")]
use log::trace;

use crate::cell::Cell;
use crate::debug::{self, DebugLevel, StepGate};
use crate::error::{EngineError, VmResult};
use crate::memory::{is_kernel_only, Memory, KERNEL_TRAP_ENTRY, SYSCALL_RETURN_PC};
use crate::mode::{Mode, RunState};
use crate::opcode::{InstructionStore, Opcode, SyscallKind};
use crate::protection::{AccessKind, AccessOutcome};
use crate::registers::Registers;

/// A fully assembled program image, ready to be loaded into a [`Cpu`].
#[derive(Debug, Clone, Default)]
pub struct ProgramImage {
    /// Initial data cells, applied in order.
    pub data: Vec<(i64, Cell)>,
    /// Decoded instructions, keyed by address.
    pub instructions: InstructionStore,
}

/// The virtual machine: memory, instruction store, register shadow,
/// privilege mode and run state.
pub struct Cpu {
    memory: Memory,
    instructions: InstructionStore,
    registers: Registers,
    mode: Mode,
    halted: bool,
    current_tid: i64,
    debug: DebugLevel,
    /// Set by [`Cpu::check_access`] when it traps a fault, so the step loop
    /// knows PC was already redirected to the kernel entry point and must
    /// not apply its generic "+1" advance on top of that jump. Reset at the
    /// start of every `step()`.
    fault_trapped: bool,
}

impl Cpu {
    /// Builds a machine preloaded with `image`, starting in kernel mode with
    /// thread 0 as the current thread.
    pub fn new(image: ProgramImage, debug: DebugLevel) -> VmResult<Self> {
        let mut memory = Memory::new();
        for (addr, cell) in image.data {
            memory.write_cell(addr, cell)?;
        }
        let registers = Registers::sync_from_memory(&memory);
        info!(
            "loaded program image: {} data cells, {} instructions",
            memory.nonzero_cells().count(),
            image.instructions.len()
        );
        Ok(Self {
            memory,
            instructions: image.instructions,
            registers,
            mode: Mode::Kernel,
            halted: false,
            current_tid: 0,
            debug,
            fault_trapped: false,
        })
    }

    /// The thread ID the engine currently attributes `HLT` semantics to.
    ///
    /// Nothing in the instruction set updates this — it is plain engine
    /// state, owned by whatever drives the machine (the CLI, an embedding,
    /// or tests), exactly as in the reference this engine is modeled on.
    pub fn current_tid(&self) -> i64 {
        self.current_tid
    }

    /// Sets the thread ID the next `HLT` should be evaluated against.
    pub fn set_current_tid(&mut self, tid: i64) {
        self.current_tid = tid;
    }

    /// Whether the run loop has terminated.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The machine's current coarse run state.
    pub fn run_state(&self) -> RunState {
        if self.halted {
            RunState::Halted
        } else {
            RunState::from_mode(self.mode)
        }
    }

    /// Read-only access to memory, for callers that want to inspect results.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Runs until the machine halts or an engine error occurs, honoring the
    /// configured [`DebugLevel`].
    pub fn run(&mut self, step_gate: &mut dyn StepGate) -> VmResult<()> {
        while !self.halted {
            self.step()?;
            match self.debug {
                DebugLevel::EveryCycle => debug::print_memory(&self.memory),
                DebugLevel::Step => {
                    debug::print_memory(&self.memory);
                    step_gate.wait_for_step();
                }
                DebugLevel::FinalDumpOnly | DebugLevel::ThreadTable => {}
            }
        }
        if matches!(self.debug, DebugLevel::FinalDumpOnly) {
            debug::print_memory(&self.memory);
        }
        Ok(())
    }

    /// Executes exactly one instruction: fetch, decode, dispatch, and
    /// reconcile INSTR_COUNT. Exposed separately from [`Cpu::run`] so tests
    /// (and an externally driven step mode) can single-step deterministically.
    pub fn step(&mut self) -> VmResult<()> {
        self.fault_trapped = false;
        self.registers.pc = self.memory.read_int(0)?;
        let pc = self.registers.pc;
        let instr = self.instructions.get(&pc).cloned().unwrap_or(Opcode::Hlt);

        if let Opcode::Syscall { kind } = instr {
            #[cfg(feature = "instr_trace")]
            trace!("pc={pc} SYSCALL {kind}");
            self.op_syscall(kind)?;
            self.registers.bump_instr_count(&mut self.memory);
            if matches!(self.debug, DebugLevel::ThreadTable) {
                debug::print_thread_table(&self.memory);
            }
            return Ok(());
        }

        #[cfg(feature = "instr_trace")]
        trace!("pc={pc} {instr}");
        self.dispatch(&instr)?;

        if !instr.manages_own_pc() && !self.fault_trapped {
            let next = self.registers.pc + 1;
            self.registers.set_pc(&mut self.memory, next);
        }
        self.registers.bump_instr_count(&mut self.memory);
        Ok(())
    }

    fn dispatch(&mut self, instr: &Opcode) -> VmResult<()> {
        match *instr {
            Opcode::Set { value, addr } => self.op_set(value, addr),
            Opcode::Cpy { src, dst } => self.op_cpy(src, dst),
            Opcode::CpyIndirect { src, dst } => self.op_cpy_indirect(src, dst),
            Opcode::CpyIndirect2 { src, dst } => self.op_cpy_indirect2(src, dst),
            Opcode::Add { addr, imm } => self.op_add(addr, imm),
            Opcode::AddIndirect { dst, src } => self.op_add_indirect(dst, src),
            Opcode::SubIndirect { src, dst } => self.op_sub_indirect(src, dst),
            Opcode::Jif { cond_addr, target } => self.op_jif(cond_addr, target),
            Opcode::Push { value } => self.op_push(value),
            Opcode::Pop { dst } => self.op_pop(dst),
            Opcode::Call { target } => self.op_call(target),
            Opcode::Ret => self.op_ret(),
            Opcode::Hlt => self.op_hlt(),
            Opcode::User { addr } => self.op_user(addr),
            Opcode::Syscall { .. } => unreachable!("SYSCALL is handled in step() before dispatch"),
        }
    }

    /// The protection unit's single operation. Performs the fault trap and
    /// returns [`AccessOutcome::Denied`] itself; callers just need to check
    /// the outcome and bail out of their remaining effects when denied.
    fn check_access(&mut self, addr: i64, kind: AccessKind) -> VmResult<AccessOutcome> {
        // Range validation is an engine error, independent of privilege.
        let _ = self.memory.read_cell(addr)?;

        if self.mode == Mode::User && is_kernel_only(addr) {
            eprintln!("ACCESS VIOLATION: User mode cannot {kind} address {addr}");
            self.registers.set_syscall_result(&mut self.memory, 1);
            self.registers.set_pc(&mut self.memory, KERNEL_TRAP_ENTRY);
            self.mode = Mode::Kernel;
            self.fault_trapped = true;
            return Ok(AccessOutcome::Denied);
        }
        Ok(AccessOutcome::Allowed)
    }

    // ---- Data movement -----------------------------------------------

    fn op_set(&mut self, value: i64, addr: i64) -> VmResult<()> {
        if self.check_access(addr, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        self.memory.write_int(addr, value)?;
        if addr == 0 {
            self.registers.set_pc(&mut self.memory, value);
        }
        Ok(())
    }

    fn op_cpy(&mut self, src: i64, dst: i64) -> VmResult<()> {
        if self.check_access(src, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(dst, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        let value = self.memory.read_int(src)?;
        self.memory.write_int(dst, value)?;
        Ok(())
    }

    fn op_cpy_indirect(&mut self, src: i64, dst: i64) -> VmResult<()> {
        if self.check_access(src, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let ptr = self.memory.read_int(src)?;
        if self.check_access(ptr, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(dst, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        let value = self.memory.read_int(ptr)?;
        self.memory.write_int(dst, value)?;
        Ok(())
    }

    fn op_cpy_indirect2(&mut self, src: i64, dst: i64) -> VmResult<()> {
        if self.check_access(src, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(dst, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let dst_ptr = self.memory.read_int(dst)?;
        if self.check_access(dst_ptr, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        let src_ptr = self.memory.read_int(src)?;
        if self.check_access(src_ptr, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let value = self.memory.read_int(src_ptr)?;
        self.memory.write_int(dst_ptr, value)?;
        if dst_ptr == 0 {
            // -1 compensates for step()'s automatic PC advance, which still
            // runs after this handler returns since CPYI2 doesn't appear in
            // Opcode::manages_own_pc().
            self.registers.set_pc(&mut self.memory, value - 1);
        }
        Ok(())
    }

    // ---- Arithmetic -----------------------------------------------------

    fn op_add(&mut self, addr: i64, imm: i64) -> VmResult<()> {
        if self.check_access(addr, AccessKind::ReadWrite)? == AccessOutcome::Denied {
            return Ok(());
        }
        let value = self.memory.read_int(addr)?;
        self.memory.write_int(addr, value + imm)?;
        Ok(())
    }

    fn op_add_indirect(&mut self, dst: i64, src: i64) -> VmResult<()> {
        if self.check_access(dst, AccessKind::ReadWrite)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(src, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let a = self.memory.read_int(dst)?;
        let b = self.memory.read_int(src)?;
        self.memory.write_int(dst, a + b)?;
        Ok(())
    }

    fn op_sub_indirect(&mut self, src: i64, dst: i64) -> VmResult<()> {
        if self.check_access(src, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(dst, AccessKind::ReadWrite)? == AccessOutcome::Denied {
            return Ok(());
        }
        let a = self.memory.read_int(src)?;
        let b = self.memory.read_int(dst)?;
        self.memory.write_int(dst, a - b)?;
        Ok(())
    }

    // ---- Control flow -----------------------------------------------------

    fn op_jif(&mut self, cond_addr: i64, target: i64) -> VmResult<()> {
        if self.check_access(cond_addr, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let cond = self.memory.read_int(cond_addr)?;
        let next = if cond <= 0 { target } else { self.registers.pc + 1 };
        self.registers.set_pc(&mut self.memory, next);
        Ok(())
    }

    fn op_call(&mut self, target: i64) -> VmResult<()> {
        let sp = self.registers.sp - 1;
        if self.check_access(sp, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        let return_pc = self.registers.pc + 1;
        self.memory.write_int(sp, return_pc)?;
        self.registers.set_sp(&mut self.memory, sp);
        self.registers.set_pc(&mut self.memory, target);
        Ok(())
    }

    fn op_ret(&mut self) -> VmResult<()> {
        let sp = self.registers.sp;
        if self.check_access(sp, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let return_pc = self.memory.read_int(sp)?;
        self.registers.set_sp(&mut self.memory, sp + 1);
        self.registers.set_pc(&mut self.memory, return_pc);
        Ok(())
    }

    // ---- Stack --------------------------------------------------------

    fn op_push(&mut self, value: i64) -> VmResult<()> {
        let sp = self.registers.sp - 1;
        if self.check_access(sp, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        self.memory.write_int(sp, value)?;
        self.registers.set_sp(&mut self.memory, sp);
        Ok(())
    }

    fn op_pop(&mut self, dst: i64) -> VmResult<()> {
        let sp = self.registers.sp;
        // No underflow check beyond the generic protection rule: popping
        // past the top of the stack simply reads whatever is at SP.
        if self.check_access(sp, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        if self.check_access(dst, AccessKind::Write)? == AccessOutcome::Denied {
            return Ok(());
        }
        let value = self.memory.read_int(sp)?;
        self.memory.write_int(dst, value)?;
        self.registers.set_sp(&mut self.memory, sp + 1);
        Ok(())
    }

    // ---- Privilege & halt ------------------------------------------------

    fn op_hlt(&mut self) -> VmResult<()> {
        if self.current_tid == 0 {
            self.halted = true;
            eprintln!("OPERATING SYSTEM HAS HALTED THE CPU.");
            info!("kernel halt at pc={}", self.registers.pc);
        } else {
            self.registers.set_syscall_result(&mut self.memory, 1);
        }
        Ok(())
    }

    fn op_user(&mut self, addr: i64) -> VmResult<()> {
        if self.check_access(addr, AccessKind::Read)? == AccessOutcome::Denied {
            return Ok(());
        }
        let entry = self.memory.read_int(addr)?;
        self.mode = Mode::User;
        self.registers.set_pc(&mut self.memory, entry);
        Ok(())
    }

    // ---- Syscall trap ---------------------------------------------------

    fn op_syscall(&mut self, kind: SyscallKind) -> VmResult<()> {
        self.mode = Mode::Kernel;
        let pc = self.registers.pc;

        match kind {
            SyscallKind::Prn(addr) => {
                let cell = self.memory.read_cell(addr)?;
                println!("{cell}");
                self.registers.set_syscall_result(&mut self.memory, 2);
                let _ = self.memory.write_int(SYSCALL_RETURN_PC as i64, pc + 1);
            }
            SyscallKind::Yield => {
                self.registers.set_syscall_result(&mut self.memory, 0);
                let _ = self.memory.write_int(SYSCALL_RETURN_PC as i64, pc + 1);
            }
            SyscallKind::Hlt => {
                self.registers.set_syscall_result(&mut self.memory, 1);
                let _ = self.memory.write_int(SYSCALL_RETURN_PC as i64, pc);
            }
        }
        self.registers.set_pc(&mut self.memory, KERNEL_TRAP_ENTRY);
        Ok(())
    }
}

/// Runs `cpu` to completion, logging a fatal engine error (if any) before
/// propagating it. Small convenience wrapper used by the CLI.
pub fn run_to_completion(cpu: &mut Cpu, step_gate: &mut dyn StepGate) -> VmResult<()> {
    cpu.run(step_gate).inspect_err(|err| {
        error!("engine error: {err}");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::NoWaitStepGate;
    use std::collections::HashMap;

    fn image(data: Vec<(i64, i64)>, instrs: Vec<(i64, Opcode)>) -> ProgramImage {
        ProgramImage {
            data: data.into_iter().map(|(a, v)| (a, Cell::Int(v))).collect(),
            instructions: instrs.into_iter().collect::<HashMap<_, _>>(),
        }
    }

    fn run_image(img: ProgramImage) -> Cpu {
        let mut cpu = Cpu::new(img, DebugLevel::FinalDumpOnly).unwrap();
        cpu.run(&mut NoWaitStepGate).unwrap();
        cpu
    }

    #[test]
    fn scenario_arithmetic() {
        let cpu = run_image(image(
            vec![(1000, 5), (1001, 7)],
            vec![
                (0, Opcode::AddIndirect { dst: 1000, src: 1001 }),
                (1, Opcode::Hlt),
            ],
        ));
        assert_eq!(cpu.memory().read_int(1000).unwrap(), 12);
        assert!(cpu.is_halted());
    }

    #[test]
    fn scenario_jump_via_set() {
        let cpu = run_image(image(
            vec![],
            vec![
                (0, Opcode::Set { value: 5, addr: 0 }),
                (1, Opcode::Hlt),
                (5, Opcode::Hlt),
            ],
        ));
        assert!(cpu.is_halted());
        assert_eq!(cpu.memory().read_int(3).unwrap(), 2);
    }

    #[test]
    fn scenario_conditional_branch() {
        let cpu = run_image(image(
            vec![(1000, 0)],
            vec![
                (0, Opcode::Jif { cond_addr: 1000, target: 10 }),
                (1, Opcode::Hlt),
                (10, Opcode::Set { value: 42, addr: 1001 }),
                (11, Opcode::Hlt),
            ],
        ));
        assert_eq!(cpu.memory().read_int(1001).unwrap(), 42);
        assert!(cpu.is_halted());
        assert_eq!(cpu.memory().read_int(3).unwrap(), 3);
    }

    #[test]
    fn scenario_call_and_return() {
        let cpu = run_image(image(
            vec![],
            vec![
                (0, Opcode::Set { value: 100, addr: 1 }),
                (1, Opcode::Call { target: 50 }),
                (2, Opcode::Hlt),
                (50, Opcode::Set { value: 7, addr: 1000 }),
                (51, Opcode::Ret),
            ],
        ));
        assert_eq!(cpu.memory().read_int(1000).unwrap(), 7);
        assert_eq!(cpu.memory().read_int(1).unwrap(), 100);
        assert_eq!(cpu.memory().read_int(0).unwrap(), 2);
    }

    #[test]
    fn scenario_protection_fault() {
        // Checked after exactly the two instructions the scenario names
        // (USER, then the faulting SET) — the image has no kernel handler
        // at 380, so run()-to-completion would go on to fetch a decode-miss
        // HLT there and isn't what this scenario is describing.
        let mut cpu = Cpu::new(
            image(
                vec![(20, 200)],
                vec![
                    (0, Opcode::User { addr: 20 }),
                    (200, Opcode::Set { value: 9, addr: 500 }),
                ],
            ),
            DebugLevel::FinalDumpOnly,
        )
        .unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.memory().read_int(0).unwrap(), 200);
        cpu.step().unwrap();
        assert_eq!(cpu.memory().read_int(0).unwrap(), 380);
        assert_eq!(cpu.memory().read_int(2).unwrap(), 1);
        assert_eq!(cpu.memory().read_int(500).unwrap(), 0);
        assert_eq!(cpu.memory().read_int(3).unwrap(), 2);
        assert!(!cpu.is_halted());
    }

    #[test]
    fn push_pop_round_trips() {
        let mut cpu = Cpu::new(
            image(
                vec![],
                vec![
                    (0, Opcode::Push { value: 77 }),
                    (1, Opcode::Pop { dst: 1000 }),
                    (2, Opcode::Hlt),
                ],
            ),
            DebugLevel::FinalDumpOnly,
        )
        .unwrap();
        let sp_before = cpu.memory().read_int(1).unwrap();
        cpu.run(&mut NoWaitStepGate).unwrap();
        assert_eq!(cpu.memory().read_int(1000).unwrap(), 77);
        assert_eq!(cpu.memory().read_int(1).unwrap(), sp_before);
    }

    #[test]
    fn cpy_chain_propagates_value() {
        let cpu = run_image(image(
            vec![(1000, 9)],
            vec![
                (0, Opcode::Cpy { src: 1000, dst: 1001 }),
                (1, Opcode::Cpy { src: 1001, dst: 1002 }),
                (2, Opcode::Hlt),
            ],
        ));
        assert_eq!(cpu.memory().read_int(1002).unwrap(), 9);
    }

    #[test]
    fn out_of_range_indirection_is_an_engine_error() {
        let mut cpu = Cpu::new(
            image(
                vec![(1000, 20_500)],
                vec![(0, Opcode::CpyIndirect { src: 1000, dst: 1001 }), (1, Opcode::Hlt)],
            ),
            DebugLevel::FinalDumpOnly,
        )
        .unwrap();
        let err = cpu.run(&mut NoWaitStepGate).unwrap_err();
        assert_eq!(err, EngineError::AddressOutOfRange { addr: 20_500 });
    }

    #[test]
    fn decode_miss_defaults_to_hlt() {
        let cpu = run_image(image(vec![], vec![]));
        assert!(cpu.is_halted());
    }

    #[test]
    fn hlt_from_nonzero_thread_only_sets_syscall_result() {
        let mut cpu = Cpu::new(
            image(vec![], vec![(0, Opcode::Hlt)]),
            DebugLevel::FinalDumpOnly,
        )
        .unwrap();
        cpu.set_current_tid(3);
        cpu.step().unwrap();
        assert!(!cpu.is_halted());
        assert_eq!(cpu.memory().read_int(2).unwrap(), 1);
    }
}
