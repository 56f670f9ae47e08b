use clap::Parser;
use sigledger::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
