//! activityctl - token activity store CLI tool
//!
//! A developer-friendly command-line interface for inspecting the
//! activity records in a persistent RocksDB store.

use clap::Parser;
use tidelog::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli::run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
