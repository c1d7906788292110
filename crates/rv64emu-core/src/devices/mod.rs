//! Memory-mapped peripherals: main memory and the three devices xv6 talks to.

pub mod clint;
pub mod dram;
pub mod plic;
pub mod uart;
pub mod virtio;
