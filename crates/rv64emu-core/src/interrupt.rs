//! Architectural interrupts (asynchronous traps).
use thiserror::Error;

/// An asynchronous trap dequeued by `CPU::check_pending_interrupt` between
/// instructions. Cause codes follow the RISC-V privileged architecture's
/// interrupt-code table; the high bit of `xcause` is set separately when the
/// trap pipeline records one of these.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    #[error("user software interrupt")]
    UserSoftwareInterrupt,
    #[error("supervisor software interrupt")]
    SupervisorSoftwareInterrupt,
    #[error("machine software interrupt")]
    MachineSoftwareInterrupt,
    #[error("user timer interrupt")]
    UserTimerInterrupt,
    #[error("supervisor timer interrupt")]
    SupervisorTimerInterrupt,
    #[error("machine timer interrupt")]
    MachineTimerInterrupt,
    #[error("user external interrupt")]
    UserExternalInterrupt,
    #[error("supervisor external interrupt")]
    SupervisorExternalInterrupt,
    #[error("machine external interrupt")]
    MachineExternalInterrupt,
}

impl Interrupt {
    /// The numeric cause code written into `xcause` (without the
    /// interrupt-indicating high bit, which the trap pipeline ORs in).
    pub fn cause(&self) -> u64 {
        match self {
            Interrupt::UserSoftwareInterrupt => 1,
            Interrupt::SupervisorSoftwareInterrupt => 2,
            Interrupt::MachineSoftwareInterrupt => 3,
            Interrupt::UserTimerInterrupt => 4,
            Interrupt::SupervisorTimerInterrupt => 5,
            Interrupt::MachineTimerInterrupt => 6,
            Interrupt::UserExternalInterrupt => 7,
            Interrupt::SupervisorExternalInterrupt => 8,
            Interrupt::MachineExternalInterrupt => 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_codes_match_privileged_spec() {
        assert_eq!(Interrupt::SupervisorSoftwareInterrupt.cause(), 2);
        assert_eq!(Interrupt::MachineExternalInterrupt.cause(), 9);
    }
}
