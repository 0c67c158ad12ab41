use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::build::{parse_component_spec, validate_staging};
use crate::cli::output::*;
use crate::manifest::{self, Manifest, ModelTable, StagedTarball};

#[derive(Args)]
pub struct ManifestArgs {
    #[command(subcommand)]
    pub command: ManifestCommand,
}

#[derive(Subcommand)]
pub enum ManifestCommand {
    /// Generate a test manifest from a base manifest and staged tarballs
    Generate(GenerateArgs),

    /// Check inference-client compatibility between two manifests
    Check(CheckArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Base manifest (local path or http(s) URL)
    #[arg(long, value_name = "PATH_OR_URL")]
    pub base: String,

    /// URL prefix under which the staged tarballs will be served
    #[arg(long, value_name = "URL")]
    pub serve_url: String,

    /// Staged components to advertise, as NAME=VERSION pairs
    #[arg(short, long = "component", value_name = "NAME=VERSION", required = true)]
    pub components: Vec<String>,

    /// Staging directory holding the versioned tarballs
    #[arg(long, default_value = "tar_files")]
    pub staging_dir: PathBuf,

    /// JSON file with a replacement model table
    #[arg(long, value_name = "PATH")]
    pub models: Option<PathBuf>,

    /// Version stamp for the generated manifest
    #[arg(long, default_value = "v0.0.2")]
    pub manifest_version: String,

    /// Where to write the generated manifest (stdout if omitted)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Base manifest (local path or http(s) URL)
    #[arg(long, value_name = "PATH_OR_URL")]
    pub base: String,

    /// Test manifest (local path or http(s) URL)
    #[arg(long, value_name = "PATH_OR_URL")]
    pub test: String,
}

pub fn run(args: ManifestArgs) -> Result<()> {
    match args.command {
        ManifestCommand::Generate(args) => generate(args),
        ManifestCommand::Check(args) => check(args),
    }
}

fn generate(args: GenerateArgs) -> Result<()> {
    let base = Manifest::load(&args.base)?;

    let components: Vec<_> = args
        .components
        .iter()
        .map(|spec| parse_component_spec(spec))
        .collect::<Result<_>>()?;
    validate_staging(&args.staging_dir, &components)?;

    let staged: Vec<StagedTarball> = components
        .into_iter()
        .map(|(component, version)| {
            let path = args.staging_dir.join(component.tarball_name(&version));
            StagedTarball {
                component,
                version,
                path,
            }
        })
        .collect();

    let models: Option<ModelTable> = match &args.models {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read model table {}", path.display()))?;
            Some(serde_json::from_str(&contents)?)
        }
        None => None,
    };

    let generated = manifest::generate_test_manifest(
        &base,
        &staged,
        &args.serve_url,
        models,
        &args.manifest_version,
    )?;

    match &args.output {
        Some(path) => {
            generated.save(path)?;
            success(&format!("Manifest written to {}", path.display()));
        }
        None => println!("{}", serde_json::to_string_pretty(&generated)?),
    }

    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let base = Manifest::load(&args.base)?;
    let test = Manifest::load(&args.test)?;

    let warnings = manifest::check_client_compatibility(&base, &test);
    if warnings.is_empty() {
        success("Manifests are inference-client compatible");
    } else {
        for message in &warnings {
            warning(message);
        }
    }
    Ok(())
}
