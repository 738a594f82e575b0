#![forbid(unsafe_code)]

//! spacewarden CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("spacewarden: {e}");
        std::process::exit(e.exit_code());
    }
}
