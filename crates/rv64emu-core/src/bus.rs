//! System bus: dispatches loads and stores to whichever device's address
//! window a physical address falls in.
use crate::devices::clint::Clint;
use crate::devices::dram::Dram;
use crate::devices::plic::Plic;
use crate::devices::uart::Uart;
use crate::devices::virtio::Virtio;
use crate::exception::Exception;
pub use crate::primitives::constants::DRAM_BASE;
use crate::primitives::constants::{
    CLINT_BASE, CLINT_END, DRAM_END, PLIC_BASE, PLIC_END, UART_BASE, UART_END, VIRTIO_BASE,
    VIRTIO_END,
};

/// The system bus. Owns every addressable device.
#[derive(Debug)]
pub struct Bus {
    pub dram: Dram,
    pub clint: Clint,
    pub plic: Plic,
    pub uart: Uart,
    pub virtio: Virtio,
}

impl Bus {
    pub fn new(dram_size: u64) -> Self {
        Self {
            dram: Dram::new(dram_size),
            clint: Clint::new(),
            plic: Plic::new(),
            uart: Uart::new(),
            virtio: Virtio::new(),
        }
    }

    /// Read `size` bits from `addr`. The upper bound of every window is
    /// inclusive of the last byte the window covers (`addr + nbytes <= end`),
    /// not exclusive of it.
    pub fn read(&mut self, addr: u64, size: u8) -> Result<u64, Exception> {
        let nbytes = (size / 8) as u64;
        if in_range(addr, nbytes, DRAM_BASE, DRAM_END) {
            return self.dram.load(addr, size);
        }
        if in_range(addr, nbytes, CLINT_BASE, CLINT_END) {
            return self.clint.load(addr, size);
        }
        if in_range(addr, nbytes, PLIC_BASE, PLIC_END) {
            return self.plic.load(addr, size);
        }
        if in_range(addr, nbytes, UART_BASE, UART_END) {
            return self.uart.load(addr, size);
        }
        if in_range(addr, nbytes, VIRTIO_BASE, VIRTIO_END) {
            return self.virtio.load(addr, size);
        }
        Err(Exception::LoadAccessFault)
    }

    pub fn write(&mut self, addr: u64, value: u64, size: u8) -> Result<(), Exception> {
        let nbytes = (size / 8) as u64;
        if in_range(addr, nbytes, DRAM_BASE, DRAM_END) {
            return self.dram.store(addr, size, value);
        }
        if in_range(addr, nbytes, CLINT_BASE, CLINT_END) {
            return self.clint.store(addr, size, value);
        }
        if in_range(addr, nbytes, PLIC_BASE, PLIC_END) {
            return self.plic.store(addr, size, value);
        }
        if in_range(addr, nbytes, UART_BASE, UART_END) {
            return self.uart.store(addr, size, value);
        }
        if in_range(addr, nbytes, VIRTIO_BASE, VIRTIO_END) {
            return self.virtio.store(addr, size, value);
        }
        Err(Exception::StoreAMOAccessFault)
    }
}

fn in_range(addr: u64, nbytes: u64, base: u64, end: u64) -> bool {
    addr >= base && addr + nbytes <= end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dram_access_roundtrips_through_bus() {
        let mut bus = Bus::new(0x1000);
        bus.write(DRAM_BASE, 0x1122_3344_5566_7788, 64).unwrap();
        assert_eq!(bus.read(DRAM_BASE, 64).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn virtio_window_is_reachable_from_both_load_and_store() {
        let mut bus = Bus::new(0x1000);
        bus.write(VIRTIO_BASE + 0x70, 7, 32).unwrap();
        assert_eq!(bus.read(VIRTIO_BASE + 0x70, 32).unwrap(), 7);
    }

    #[test]
    fn gap_between_windows_faults() {
        let mut bus = Bus::new(0x1000);
        assert!(bus.read(CLINT_END + 0x1000, 8).is_err());
    }

    #[test]
    fn final_byte_of_each_window_is_reachable() {
        let mut bus = Bus::new(DRAM_END - DRAM_BASE);
        assert!(bus.read(DRAM_END - 1, 8).is_ok());
    }
}
