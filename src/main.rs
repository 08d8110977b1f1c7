use std::process::ExitCode;

use clap::Parser;
use tenantledger::{
    cli,
    config::{CliArgs, Config},
    logging,
};

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = Config::load(&args);
    logging::init(&config.logging);

    match cli::run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
