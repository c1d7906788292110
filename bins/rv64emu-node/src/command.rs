//! CLI commands for the emulator front-end.
use clap::Parser;
use std::path::PathBuf;

/// RV64 hart emulator
#[derive(Parser)]
#[clap(name = "rv64emu-node", version, about, long_about = None)]
pub struct Cli {
    /// Kernel image to load at the start of DRAM and jump to
    pub kernel: PathBuf,

    /// Disk image to back the VirtIO block device
    pub disk: Option<PathBuf>,

    /// DRAM size in bytes
    #[clap(long, default_value_t = rv64emu_core::primitives::constants::DRAM_SIZE)]
    pub ram_size: u64,

    /// How a fatal exception (illegal instruction, access fault) is handled
    #[clap(long, value_enum, default_value_t = FatalModeArg::Abort)]
    pub fatal_mode: FatalModeArg,

    /// Increase tracing verbosity (repeatable: -v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum FatalModeArg {
    /// Stop the emulator and report the exception
    Abort,
    /// Deliver it through the normal trap pipeline like any other exception
    Trap,
}

impl From<FatalModeArg> for rv64emu_core::cpu::trap::FatalMode {
    fn from(arg: FatalModeArg) -> Self {
        match arg {
            FatalModeArg::Abort => rv64emu_core::cpu::trap::FatalMode::Abort,
            FatalModeArg::Trap => rv64emu_core::cpu::trap::FatalMode::Trap,
        }
    }
}
