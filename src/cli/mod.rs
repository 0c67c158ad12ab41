pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ota-harness",
    version,
    about = "Update scenario test harness for station component bundles",
    long_about = "Builds versioned component tarballs through the external build script, \
                  serves them with generated manifests over local HTTP, and drives the \
                  external update client through base-to-test upgrade scenarios, reporting \
                  success, failure, or skipped per component."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build component tarballs into the staging area
    Build(commands::build::BuildArgs),

    /// Generate or check update manifests
    Manifest(commands::manifest::ManifestArgs),

    /// Serve the staging area over local HTTP
    Serve(commands::serve::ServeArgs),

    /// Run an update scenario against the external client
    Test(commands::test::TestArgs),

    /// Snapshot or verify installed-tree checksums
    Checksum(commands::checksum::ChecksumArgs),
}
