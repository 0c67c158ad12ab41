use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::checksum;
use crate::cli::output::*;
use crate::HarnessError;

#[derive(Args)]
pub struct ChecksumArgs {
    #[command(subcommand)]
    pub command: ChecksumCommand,
}

#[derive(Subcommand)]
pub enum ChecksumCommand {
    /// Snapshot a tree into a JSON checksum map
    Generate {
        /// Root of the installed tree
        root: PathBuf,

        /// Snapshot file to write
        #[arg(short, long, default_value = "expected_checksum.json")]
        output: PathBuf,
    },

    /// Verify a tree against a checksum snapshot
    Verify {
        /// Root of the installed tree
        root: PathBuf,

        /// Snapshot file to verify against
        #[arg(short, long, default_value = "expected_checksum.json")]
        expected: PathBuf,
    },
}

pub fn run(args: ChecksumArgs) -> Result<()> {
    match args.command {
        ChecksumCommand::Generate { root, output } => {
            let map = checksum::snapshot_tree(&root)?;
            checksum::save_snapshot(&output, &map)?;
            success(&format!(
                "Snapshot of {} files written to {}",
                map.len(),
                output.display()
            ));
            Ok(())
        }
        ChecksumCommand::Verify { root, expected } => {
            let map = checksum::load_snapshot(&expected)?;
            let mismatches = checksum::verify_tree(&root, &map)?;
            if mismatches.is_empty() {
                success(&format!("{} matches its snapshot", root.display()));
                return Ok(());
            }
            for mismatch in &mismatches {
                error(&mismatch.to_string());
            }
            Err(HarnessError::Other(format!(
                "{} checksum mismatch(es) in {}",
                mismatches.len(),
                root.display()
            ))
            .into())
        }
    }
}
