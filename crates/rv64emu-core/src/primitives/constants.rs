//! Global constants: bit widths and the physical memory map.

/// Number of integer registers.
pub const NUM_REGISTERS: usize = 32;

/// One byte, in bits.
pub const BYTE: u8 = 8;
/// Half word, in bits.
pub const HALFWORD: u8 = 16;
/// Whole word, in bits.
pub const WORD: u8 = 32;
/// Doubleword, in bits.
pub const DOUBLEWORD: u8 = 64;

/// Base physical address of DRAM.
pub const DRAM_BASE: u64 = 0x8000_0000;
/// Size of DRAM (128 MiB).
pub const DRAM_SIZE: u64 = 128 * 1024 * 1024;
/// First address past the end of DRAM.
pub const DRAM_END: u64 = DRAM_BASE + DRAM_SIZE;

/// Base physical address of the CLINT (timer / software interrupt) window.
pub const CLINT_BASE: u64 = 0x0200_0000;
/// Size of the CLINT window.
pub const CLINT_SIZE: u64 = 0x10000;
/// First address past the end of the CLINT window.
pub const CLINT_END: u64 = CLINT_BASE + CLINT_SIZE;

/// Base physical address of the PLIC (platform-level interrupt controller) window.
pub const PLIC_BASE: u64 = 0x0C00_0000;
/// Size of the PLIC window.
pub const PLIC_SIZE: u64 = 0x0400_0000;
/// First address past the end of the PLIC window.
pub const PLIC_END: u64 = PLIC_BASE + PLIC_SIZE;

/// Base physical address of the UART window.
pub const UART_BASE: u64 = 0x1000_0000;
/// Size of the UART window.
pub const UART_SIZE: u64 = 0x100;
/// First address past the end of the UART window.
pub const UART_END: u64 = UART_BASE + UART_SIZE;

/// Base physical address of the VirtIO MMIO window.
pub const VIRTIO_BASE: u64 = 0x1000_1000;
/// Size of the VirtIO MMIO window.
pub const VIRTIO_SIZE: u64 = 0x1000;
/// First address past the end of the VirtIO MMIO window.
pub const VIRTIO_END: u64 = VIRTIO_BASE + VIRTIO_SIZE;
