//! Core-local interruptor: the timer and the machine-timer-compare register.
use crate::exception::Exception;
use crate::primitives::constants::CLINT_BASE;
use crate::reg::csr::state::State;
use crate::reg::csr::{MIP, MTIP_BIT};

/// Offset of `mtimecmp` within the CLINT window.
const MTIMECMP: u64 = 0x4000;
/// Offset of `mtime` within the CLINT window.
const MTIME: u64 = 0xbff8;

/// CLINT: owns `mtime` and `mtimecmp`, raising MTIP in `mip` once the clock
/// catches up to the compare value.
#[derive(Debug)]
pub struct Clint {
    mtime: u64,
    mtimecmp: u64,
}

impl Clint {
    pub fn new() -> Self {
        Self {
            mtime: 0,
            mtimecmp: 0,
        }
    }

    /// Advance the clock by one tick and raise MTIP if it has reached or
    /// passed `mtimecmp`.
    pub fn increment(&mut self, state: &mut State) {
        self.mtime = self.mtime.wrapping_add(1);
        if self.mtime >= self.mtimecmp {
            state.write(MIP, state.read(MIP) | MTIP_BIT);
        }
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        if size != 64 {
            return Err(Exception::LoadAccessFault);
        }
        match addr - CLINT_BASE {
            MTIMECMP => Ok(self.mtimecmp),
            MTIME => Ok(self.mtime),
            _ => Ok(0),
        }
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if size != 64 {
            return Err(Exception::StoreAMOAccessFault);
        }
        match addr - CLINT_BASE {
            MTIMECMP => self.mtimecmp = value,
            MTIME => self.mtime = value,
            _ => {}
        }
        Ok(())
    }
}

impl Default for Clint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_mtip_once_clock_reaches_compare() {
        let mut clint = Clint::new();
        let mut state = State::new();
        clint
            .store(CLINT_BASE + MTIMECMP, 64, 2)
            .unwrap();
        clint.increment(&mut state);
        assert_eq!(state.read(MIP) & MTIP_BIT, 0);
        clint.increment(&mut state);
        assert_eq!(state.read(MIP) & MTIP_BIT, MTIP_BIT);
    }

    #[test]
    fn mtime_register_roundtrips() {
        let mut clint = Clint::new();
        clint.store(CLINT_BASE + MTIME, 64, 42).unwrap();
        assert_eq!(clint.load(CLINT_BASE + MTIME, 64).unwrap(), 42);
    }
}
