//! This holds print displays for the node
use colored::Colorize;

pub fn print_startup_banner(kernel: &str, ram_size: u64) {
    println!(
        "\n{}",
        "╔═════════════════════════════════════════════╗".bright_cyan()
    );
    println!(
        "{} {}  {}",
        "║".bright_cyan(),
        " RV64EMU ".bold(),
        "║".bright_cyan()
    );
    println!("{} kernel: {}", "║".bright_cyan(), kernel.yellow());
    println!(
        "{} ram:    {}",
        "║".bright_cyan(),
        format!("{} MiB", ram_size / (1024 * 1024)).bright_blue()
    );
    println!(
        "{}",
        "╚═════════════════════════════════════════════╝".bright_cyan()
    );
    println!();
}

pub fn print_halt(reason: &str) {
    println!("\n{} {}", "halted:".red().bold(), reason);
}
