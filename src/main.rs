use colored::Colorize;
use vigil::cli::Cli;

fn main() {
    if let Err(e) = Cli::run() {
        eprintln!("{} {}", "✗ Error:".red().bold(), e);
        std::process::exit(1);
    }
}
