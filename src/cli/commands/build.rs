use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::build::{parse_component_spec, BuildRunner};
use crate::cli::output::*;
use crate::manifest::Component;

#[derive(Args)]
pub struct BuildArgs {
    /// Components to build as NAME=VERSION pairs (e.g. hypervisor=v0.0.2)
    #[arg(short, long = "component", value_name = "NAME=VERSION", required = true)]
    pub components: Vec<String>,

    /// Platform passed through to the build script
    #[arg(long, default_value = "ubuntu")]
    pub platform: String,

    /// Directory containing build.sh
    #[arg(long, default_value = "app")]
    pub app_dir: PathBuf,

    /// Directory where the build script writes its tarballs
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Staging directory for versioned tarballs
    #[arg(long, default_value = "tar_files")]
    pub staging_dir: PathBuf,

    /// Pass --build-clean to the build script
    #[arg(long)]
    pub build_clean: bool,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let components: Vec<(Component, String)> = args
        .components
        .iter()
        .map(|spec| parse_component_spec(spec))
        .collect::<Result<_>>()?;

    section_header("Building Component Tarballs");

    let runner = BuildRunner::new(
        &args.app_dir,
        &args.output_dir,
        &args.staging_dir,
        &args.platform,
    )
    .with_build_clean(args.build_clean);

    let pb = create_spinner("Running build script...");
    let staged = runner.build_all(&components)?;
    pb.finish_and_clear();

    for tarball in &staged {
        success(&format!(
            "{} {} -> {}",
            tarball.component,
            tarball.version,
            tarball.path.display()
        ));
    }

    let mut table = create_standard_table();
    table.set_header(vec![
        header_cell("Component"),
        header_cell("Version"),
        header_cell("Tarball"),
    ]);
    for tarball in &staged {
        table.add_row(vec![
            tarball.component.to_string(),
            tarball.version.clone(),
            tarball
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ]);
    }
    println!("{}", table);

    Ok(())
}
