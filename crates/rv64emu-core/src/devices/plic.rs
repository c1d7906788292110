//! Platform-level interrupt controller: claim/enable/priority/pending for
//! the supervisor-mode external-interrupt path used by UART and VirtIO.
use crate::exception::Exception;
use crate::primitives::constants::PLIC_BASE;

const PENDING: u64 = 0x1000;
const SENABLE: u64 = 0x2080;
const SPRIORITY: u64 = 0x201000;
const SCLAIM: u64 = 0x201004;

/// PLIC register file, addressed consistently by raw offset for both load
/// and store (the reference implementation mixed enum-member and raw-value
/// matching across its `load`/`store`, which made the two paths diverge).
#[derive(Debug)]
pub struct Plic {
    pending: u64,
    senable: u64,
    spriority: u64,
    sclaim: u64,
}

impl Plic {
    pub fn new() -> Self {
        Self {
            pending: 0,
            senable: 0,
            spriority: 0,
            sclaim: 0,
        }
    }

    /// Mark `irq` pending and latch it as the next claim.
    pub fn update_pending(&mut self, irq: u64) {
        self.pending |= 1 << irq;
        self.sclaim = irq;
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        if size != 32 {
            return Err(Exception::LoadAccessFault);
        }
        match addr - PLIC_BASE {
            PENDING => Ok(self.pending),
            SENABLE => Ok(self.senable),
            SPRIORITY => Ok(self.spriority),
            SCLAIM => Ok(self.sclaim),
            _ => Ok(0),
        }
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if size != 32 {
            return Err(Exception::StoreAMOAccessFault);
        }
        match addr - PLIC_BASE {
            PENDING => self.pending = value,
            SENABLE => self.senable = value,
            SPRIORITY => self.spriority = value,
            SCLAIM => {
                // Completing a claim clears the pending bit for that irq.
                self.pending &= !(1 << value);
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_pending_sets_bit_and_claim() {
        let mut plic = Plic::new();
        plic.update_pending(10);
        assert_eq!(plic.load(PLIC_BASE + PENDING, 32).unwrap(), 1 << 10);
        assert_eq!(plic.load(PLIC_BASE + SCLAIM, 32).unwrap(), 10);
    }

    #[test]
    fn completing_claim_clears_pending() {
        let mut plic = Plic::new();
        plic.update_pending(1);
        plic.store(PLIC_BASE + SCLAIM, 32, 1).unwrap();
        assert_eq!(plic.load(PLIC_BASE + PENDING, 32).unwrap(), 0);
    }
}
