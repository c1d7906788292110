//! Emulator module for RV64: wires a [`CPU`] to a kernel/disk image and
//! drives the fetch-execute-interrupt loop until the hart halts.
use crate::cpu::trap::{self, FatalMode};
use crate::cpu::CPU;
use crate::exception::Exception;
use crate::primitives::constants::DRAM_BASE;

/// Why [`Emu::start`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `wfi` was executed and no interrupt will ever arrive to wake it
    /// (not detected in practice; reserved for an explicit halt instruction).
    Halted,
    /// A fatal exception reached the hart under [`FatalMode::Abort`].
    Fatal(Exception),
}

/// Owns the hart and drives it.
#[derive(Debug)]
pub struct Emu {
    pub cpu: CPU,
    fatal_mode: FatalMode,
}

impl Emu {
    /// Create a new emulator with `ram_size` bytes of DRAM.
    pub fn new(ram_size: u64, fatal_mode: FatalMode) -> Self {
        let mut cpu = CPU::new(ram_size);
        cpu.pc = DRAM_BASE;
        Self { cpu, fatal_mode }
    }

    /// Reset the hart to its power-on state.
    pub fn restart(&mut self) {
        self.cpu.reset();
        self.cpu.pc = DRAM_BASE;
    }

    /// Copy `image` to the start of DRAM (where `pc` begins execution).
    pub fn initialize_dram(&mut self, image: Vec<u8>) {
        self.cpu.bus.dram.load_image(&image);
    }

    /// Set the program counter the hart starts fetching from.
    pub fn initialize_pc(&mut self, pc: u64) {
        self.cpu.pc = pc;
    }

    /// Load a disk image into the VirtIO block device.
    pub fn load_disk_image(&mut self, image: &[u8]) {
        self.cpu.bus.virtio.load_disk_image(image);
    }

    /// Run until a fatal exception under [`FatalMode::Abort`], or `should_stop`
    /// reports `true` (checked once per retired instruction).
    pub fn start(&mut self, mut should_stop: impl FnMut() -> bool) -> StopReason {
        loop {
            if should_stop() {
                return StopReason::Halted;
            }

            self.cpu.devices_increment();

            match self.cpu.execute() {
                Ok(_) => {}
                Err(exception) => {
                    if let trap::TrapOutcome::Fatal(e) =
                        trap::take_exception(&mut self.cpu, exception, self.fatal_mode)
                    {
                        return StopReason::Fatal(e);
                    }
                }
            }

            if let Some(interrupt) = self.cpu.check_pending_interrupt() {
                trap::take_interrupt(&mut self.cpu, interrupt);
            }
        }
    }

    /// A human-readable dump of the hart's architectural state, for
    /// diagnostics on halt.
    pub fn dump_registers(&self) -> String {
        format!(
            "pc={:#018x} mode={:?}\n{}\n{}",
            self.cpu.pc, self.cpu.mode, self.cpu.int_regs, self.cpu.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_simple_program_to_illegal_instruction() {
        let mut emu = Emu::new(0x1000, FatalMode::Abort);
        // addi x5, x0, 42 ; then an all-zero word (illegal).
        emu.initialize_dram(vec![0x93, 0x02, 0xa0, 0x02, 0x00, 0x00, 0x00, 0x00]);
        emu.initialize_pc(DRAM_BASE);
        let reason = emu.start(|| false);
        assert_eq!(
            reason,
            StopReason::Fatal(Exception::IllegalInstruction(0))
        );
        assert_eq!(emu.cpu.int_regs.read(5), 42);
    }

    #[test]
    fn trap_mode_survives_an_illegal_instruction_by_redirecting_pc() {
        let mut emu = Emu::new(0x1000, FatalMode::Trap);
        emu.initialize_dram(vec![0x00, 0x00, 0x00, 0x00]);
        emu.initialize_pc(DRAM_BASE);
        emu.cpu
            .state
            .write(crate::reg::csr::MTVEC, DRAM_BASE + 0x100);

        let mut iterations = 0;
        let reason = emu.start(|| {
            iterations += 1;
            iterations > 1
        });

        assert_eq!(reason, StopReason::Halted);
        assert_eq!(emu.cpu.pc, DRAM_BASE + 0x100);
    }
}
