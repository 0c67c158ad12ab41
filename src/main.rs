use clap::Parser;
use colored::*;
use ota_harness::cli::{Cli, Commands};
use ota_harness::HarnessError;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // OTA_HARNESS_LOG overrides the default level; -v flags raise it further
    let default_level = match cli.verbose {
        0 => std::env::var("OTA_HARNESS_LOG").unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);

        // Use appropriate exit codes based on error type
        let exit_code = match e.downcast_ref::<HarnessError>() {
            Some(HarnessError::Config(_)) | Some(HarnessError::Manifest(_)) => 2,
            Some(HarnessError::Io(_)) => 3,
            Some(HarnessError::Parse(_)) => 4,
            Some(HarnessError::Build(_)) => 5,
            Some(HarnessError::Client(_)) | Some(HarnessError::Server(_)) => 6,
            _ => 1,
        };
        process::exit(exit_code);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => ota_harness::cli::commands::build::run(args),
        Commands::Manifest(args) => ota_harness::cli::commands::manifest::run(args),
        Commands::Serve(args) => ota_harness::cli::commands::serve::run(args),
        Commands::Test(args) => ota_harness::cli::commands::test::run(args),
        Commands::Checksum(args) => ota_harness::cli::commands::checksum::run(args),
    }
}
