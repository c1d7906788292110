//! CLI front-end for the RV64 emulator core.
mod command;
mod pretty_print;

use clap::Parser;
use command::Cli;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rv64emu_core::emu::{Emu, StopReason};

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = match cli.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!("rv64emu_core={level},rv64emu_node={level}"))
        }))
        .init();

    let kernel = fs::read(&cli.kernel)?;

    pretty_print::print_startup_banner(&cli.kernel.display().to_string(), cli.ram_size);

    let mut emu = Emu::new(cli.ram_size, cli.fatal_mode.into());
    emu.initialize_dram(kernel);

    if let Some(disk) = &cli.disk {
        let disk_image = fs::read(disk)?;
        emu.load_disk_image(&disk_image);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let reason = emu.start(|| interrupted.load(Ordering::SeqCst));

    match reason {
        StopReason::Halted => {
            pretty_print::print_halt("Ctrl-C");
            tracing::info!("{}", emu.dump_registers());
        }
        StopReason::Fatal(exception) => {
            pretty_print::print_halt(&exception.to_string());
            tracing::error!("{}", emu.dump_registers());
        }
    }

    Ok(())
}
