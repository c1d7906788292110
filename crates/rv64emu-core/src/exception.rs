//! Architectural exceptions (synchronous traps).
use thiserror::Error;

/// A synchronous trap raised by fetch, translation, or instruction execution.
///
/// Cause codes follow the RISC-V privileged architecture's exception-code
/// table (note the reserved gaps at codes 10 and 14).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    #[error("instruction address misaligned: {0:#x}")]
    InstructionAddressMisaligned(u64),
    #[error("instruction access fault: {0:#x}")]
    InstructionAccessFault,
    #[error("illegal instruction: {0:#x}")]
    IllegalInstruction(u64),
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/amo address misaligned")]
    StoreAMOAddressMisaligned,
    #[error("store/amo access fault")]
    StoreAMOAccessFault,
    #[error("environment call from U-mode")]
    EnvironmentCallFromUMode,
    #[error("environment call from S-mode")]
    EnvironmentCallFromSMode,
    #[error("environment call from M-mode")]
    EnvironmentCallFromMMode,
    #[error("instruction page fault: {0:#x}")]
    InstructionPageFault(u64),
    #[error("load page fault: {0:#x}")]
    LoadPageFault(u64),
    #[error("store/amo page fault: {0:#x}")]
    StoreAMOPageFault(u64),
}

impl Exception {
    /// The numeric cause code written into `xcause` (bit 63 clear: this is
    /// never an interrupt).
    pub fn cause(&self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(_) => 0,
            Exception::InstructionAccessFault => 1,
            Exception::IllegalInstruction(_) => 2,
            Exception::Breakpoint => 3,
            Exception::LoadAddressMisaligned => 4,
            Exception::LoadAccessFault => 5,
            Exception::StoreAMOAddressMisaligned => 6,
            Exception::StoreAMOAccessFault => 7,
            Exception::EnvironmentCallFromUMode => 8,
            Exception::EnvironmentCallFromSMode => 9,
            Exception::EnvironmentCallFromMMode => 11,
            Exception::InstructionPageFault(_) => 12,
            Exception::LoadPageFault(_) => 13,
            Exception::StoreAMOPageFault(_) => 15,
        }
    }

    /// `true` for the bus/decode/misaligned faults this emulator treats as
    /// unrecoverable by default (see `cpu::trap::FatalMode`).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Exception::InstructionAddressMisaligned(_)
                | Exception::InstructionAccessFault
                | Exception::IllegalInstruction(_)
                | Exception::LoadAccessFault
                | Exception::StoreAMOAddressMisaligned
                | Exception::StoreAMOAccessFault
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_codes_match_privileged_spec() {
        assert_eq!(Exception::InstructionAddressMisaligned(0).cause(), 0);
        assert_eq!(Exception::Breakpoint.cause(), 3);
        assert_eq!(Exception::EnvironmentCallFromMMode.cause(), 11);
        assert_eq!(Exception::InstructionPageFault(0).cause(), 12);
        assert_eq!(Exception::StoreAMOPageFault(0).cause(), 15);
    }

    #[test]
    fn fatal_set_matches_spec() {
        assert!(Exception::IllegalInstruction(0).is_fatal());
        assert!(Exception::StoreAMOAccessFault.is_fatal());
        assert!(!Exception::Breakpoint.is_fatal());
        assert!(!Exception::EnvironmentCallFromSMode.is_fatal());
    }
}
