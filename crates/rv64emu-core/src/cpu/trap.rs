//! The trap-transition pipeline: given an exception or interrupt raised by
//! [`CPU::execute`](super::CPU::execute) or
//! [`CPU::check_pending_interrupt`](super::CPU::check_pending_interrupt), decides whether
//! it is delegated to supervisor mode or handled in machine mode, and performs the six-step
//! transition (mode switch, `pc` redirect to the trap vector, `xepc`/`xcause`/`xtval`, and the
//! `xpie`/`xie`/`xpp` stack update).
use crate::cpu::{Mode, CPU};
use crate::exception::Exception;
use crate::interrupt::Interrupt;
use crate::reg::csr::{
    MCAUSE, MEDELEG, MEPC, MIDELEG, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP, MTVAL, MTVEC, SCAUSE,
    SEPC, STVAL, STVEC, XSTATUS_SIE, XSTATUS_SPIE, XSTATUS_SPP,
};

/// How a fatal exception (one that should never occur on a correctly
/// functioning kernel) is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalMode {
    /// Stop the emulator and report the exception to the caller.
    Abort,
    /// Deliver it through the normal trap pipeline like any other exception.
    Trap,
}

/// What happened after driving a trap through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The trap was delivered; execution should resume at the new `pc`.
    Handled,
    /// A fatal exception reached [`FatalMode::Abort`]; the emulator should stop.
    Fatal(Exception),
}

/// Drive `exception` through the trap pipeline.
pub fn take_exception(cpu: &mut CPU, exception: Exception, fatal_mode: FatalMode) -> TrapOutcome {
    if exception.is_fatal() && fatal_mode == FatalMode::Abort {
        return TrapOutcome::Fatal(exception);
    }

    let cause = exception.cause();
    let delegated = cpu.mode != Mode::Machine && (cpu.state.read(MEDELEG) & (1 << cause)) != 0;

    transition(cpu, cause, delegated);
    TrapOutcome::Handled
}

/// Drive `interrupt` through the trap pipeline.
pub fn take_interrupt(cpu: &mut CPU, interrupt: Interrupt) -> TrapOutcome {
    let cause = interrupt.cause();
    let delegated = (cpu.state.read(MIDELEG) & (1 << cause)) != 0;
    let interrupt_bit = 1u64 << 63;

    transition(cpu, cause | interrupt_bit, delegated);
    TrapOutcome::Handled
}

fn transition(cpu: &mut CPU, cause: u64, delegate_to_supervisor: bool) {
    let pc = cpu.pc;
    let previous_mode = cpu.mode;

    if delegate_to_supervisor {
        cpu.state.write(SEPC, pc);
        cpu.state.write(SCAUSE, cause);
        cpu.state.write(STVAL, 0);
        cpu.pc = trap_vector_pc(cpu.state.read(STVEC), cause);

        let sie = cpu.state.read_sstatus(XSTATUS_SIE);
        cpu.state.write_sstatus(XSTATUS_SPIE, sie);
        cpu.state.write_sstatus(XSTATUS_SIE, 0);
        cpu.state
            .write_sstatus(XSTATUS_SPP, (previous_mode == Mode::Supervisor) as u64);

        cpu.mode = Mode::Supervisor;
    } else {
        cpu.state.write(MEPC, pc);
        cpu.state.write(MCAUSE, cause);
        cpu.state.write(MTVAL, 0);
        cpu.pc = trap_vector_pc(cpu.state.read(MTVEC), cause);

        let mie = cpu.state.read_mstatus(MSTATUS_MIE);
        cpu.state.write_mstatus(MSTATUS_MPIE, mie);
        cpu.state.write_mstatus(MSTATUS_MIE, 0);
        cpu.state.write_mstatus(MSTATUS_MPP, previous_mode as u64);

        cpu.mode = Mode::Machine;
    }
}

/// Resolve a `mtvec`/`stvec` value to the address execution resumes at.
/// Mode 0 (direct) always jumps to the base; mode 1 (vectored) adds
/// `4 * cause` for interrupts (the top bit of `cause` marks an interrupt).
fn trap_vector_pc(tvec: u64, cause: u64) -> u64 {
    let base = tvec & !0b11;
    let vectored = tvec & 0b11 == 1;
    let is_interrupt = cause & (1 << 63) != 0;
    if vectored && is_interrupt {
        base + 4 * (cause & !(1 << 63))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_cpu() -> CPU {
        CPU::new(0x1000)
    }

    #[test]
    fn undelegated_exception_enters_machine_mode() {
        let mut cpu = new_cpu();
        cpu.pc = 0x8000_1000;
        cpu.state.write(crate::reg::csr::MTVEC, 0x8000_0000);
        let outcome = take_exception(&mut cpu, Exception::IllegalInstruction(0), FatalMode::Trap);
        assert_eq!(outcome, TrapOutcome::Handled);
        assert_eq!(cpu.mode, Mode::Machine);
        assert_eq!(cpu.pc, 0x8000_0000);
        assert_eq!(cpu.state.read(MEPC), 0x8000_1000);
        assert_eq!(cpu.state.read(MCAUSE), Exception::IllegalInstruction(0).cause());
    }

    #[test]
    fn delegated_exception_enters_supervisor_mode_and_sets_spp() {
        let mut cpu = new_cpu();
        cpu.mode = Mode::User;
        cpu.pc = 0x8000_2000;
        cpu.state.write(MEDELEG, 1 << Exception::Breakpoint.cause());
        cpu.state.write(STVEC, 0x8000_3000);
        take_exception(&mut cpu, Exception::Breakpoint, FatalMode::Trap);
        assert_eq!(cpu.mode, Mode::Supervisor);
        assert_eq!(cpu.pc, 0x8000_3000);
        assert_eq!(cpu.state.read_sstatus(XSTATUS_SPP), 0);
    }

    #[test]
    fn abort_mode_reports_fatal_instead_of_trapping() {
        let mut cpu = new_cpu();
        let outcome = take_exception(
            &mut cpu,
            Exception::InstructionAccessFault,
            FatalMode::Abort,
        );
        assert_eq!(outcome, TrapOutcome::Fatal(Exception::InstructionAccessFault));
    }

    #[test]
    fn trap_mode_delivers_even_fatal_exceptions() {
        let mut cpu = new_cpu();
        let outcome = take_exception(
            &mut cpu,
            Exception::InstructionAccessFault,
            FatalMode::Trap,
        );
        assert_eq!(outcome, TrapOutcome::Handled);
    }

    #[test]
    fn vectored_interrupt_jumps_to_cause_slot() {
        let mut cpu = new_cpu();
        cpu.state.write(MTVEC, 0x8000_4000 | 1);
        take_interrupt(&mut cpu, Interrupt::MachineTimerInterrupt);
        let cause = Interrupt::MachineTimerInterrupt.cause();
        assert_eq!(cpu.pc, 0x8000_4000 + 4 * cause);
    }
}
