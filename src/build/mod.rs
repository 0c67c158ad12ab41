use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tar::Archive;
use tracing::{debug, info};

use crate::manifest::{Component, StagedTarball};
use crate::HarnessError;

/// Runs the external build script and stages the produced tarballs under
/// versioned names. Build failures abort immediately: building is one-time
/// setup, not a behavior under test.
pub struct BuildRunner {
    app_dir: PathBuf,
    output_dir: PathBuf,
    staging_dir: PathBuf,
    platform: String,
    build_clean: bool,
}

impl BuildRunner {
    pub fn new(
        app_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        staging_dir: impl AsRef<Path>,
        platform: &str,
    ) -> Self {
        Self {
            app_dir: app_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
            platform: platform.to_string(),
            build_clean: false,
        }
    }

    pub fn with_build_clean(mut self, build_clean: bool) -> Self {
        self.build_clean = build_clean;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Build and stage every requested component, in order.
    pub fn build_all(&self, components: &[(Component, String)]) -> Result<Vec<StagedTarball>> {
        let script = self.app_dir.join("build.sh");
        if !script.exists() {
            return Err(
                HarnessError::Build(format!("build.sh not found in {}", self.app_dir.display()))
                    .into(),
            );
        }

        fs::create_dir_all(&self.staging_dir).with_context(|| {
            format!(
                "Failed to create staging directory {}",
                self.staging_dir.display()
            )
        })?;

        let mut staged = Vec::with_capacity(components.len());
        for (component, version) in components {
            staged.push(self.build_one(*component, version)?);
        }
        Ok(staged)
    }

    fn build_one(&self, component: Component, version: &str) -> Result<StagedTarball> {
        let mut cmd = Command::new("bash");
        cmd.arg("build.sh")
            .arg(component.build_target())
            .arg(&self.platform)
            .arg(format!("--version={}", version));
        if self.build_clean {
            cmd.arg("--build-clean");
        }
        cmd.current_dir(&self.app_dir);

        info!("Building {} {} via build.sh", component, version);
        debug!("Build command: {:?}", cmd);

        let output = cmd
            .output()
            .with_context(|| format!("Failed to run build.sh in {}", self.app_dir.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::Build(format!(
                "build failed for {} {}: {}",
                component,
                version,
                stderr.trim()
            ))
            .into());
        }

        // The build script writes an unversioned tarball; stage it under the
        // component_version name the manifests reference.
        let produced = self.output_dir.join(format!("{}.tar.gz", component.name()));
        if !produced.exists() {
            return Err(HarnessError::Build(format!(
                "{}.tar.gz not found in {} after build",
                component.name(),
                self.output_dir.display()
            ))
            .into());
        }

        let dest = self.staging_dir.join(component.tarball_name(version));
        fs::copy(&produced, &dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                produced.display(),
                dest.display()
            )
        })?;

        let entries = verify_tarball(&dest)?;
        info!("Staged {} ({} entries)", dest.display(), entries);
        Ok(StagedTarball {
            component,
            version: version.to_string(),
            path: dest,
        })
    }
}

/// Walk a staged tarball's entries, catching truncated or mis-compressed
/// archives before a scenario serves them. Returns the entry count.
pub fn verify_tarball(path: &Path) -> Result<usize> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open staged tarball {}", path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut count = 0;
    for entry in archive
        .entries()
        .with_context(|| format!("Failed to read tarball {}", path.display()))?
    {
        entry.with_context(|| format!("Corrupt entry in tarball {}", path.display()))?;
        count += 1;
    }
    if count == 0 {
        return Err(
            HarnessError::Build(format!("tarball {} has no entries", path.display())).into(),
        );
    }
    Ok(count)
}

/// Whether a filename follows the `<component>_<version>.tar.gz` convention.
pub fn is_valid_tarball_name(name: &str) -> bool {
    // Component stem, underscore, version starting with a digit or 'v<digit>'
    let pattern = Regex::new(r"^[a-z][a-z0-9-]*_v?\d[A-Za-z0-9._-]*\.tar\.gz$")
        .expect("tarball name pattern is valid");
    pattern.is_match(name)
}

/// Verify every required tarball exists in the staging area before a scenario
/// that references it runs.
pub fn validate_staging(staging_dir: &Path, required: &[(Component, String)]) -> Result<()> {
    let mut missing = Vec::new();
    for (component, version) in required {
        let name = component.tarball_name(version);
        if !is_valid_tarball_name(&name) {
            return Err(HarnessError::Build(format!("malformed tarball name: {}", name)).into());
        }
        if !staging_dir.join(&name).exists() {
            missing.push(name);
        }
    }

    if !missing.is_empty() {
        return Err(HarnessError::Build(format!(
            "missing staged tarballs in {}: {}",
            staging_dir.display(),
            missing.join(", ")
        ))
        .into());
    }
    Ok(())
}

/// Parse a `name=version` component spec from the command line.
pub fn parse_component_spec(spec: &str) -> Result<(Component, String)> {
    let (name, version) = spec.split_once('=').ok_or_else(|| {
        HarnessError::Config(format!(
            "invalid component spec '{}', expected NAME=VERSION",
            spec
        ))
    })?;
    let component: Component = name
        .trim()
        .parse()
        .map_err(HarnessError::Config)?;
    let version = version.trim();
    if version.is_empty() {
        return Err(HarnessError::Config(format!("empty version in spec '{}'", spec)).into());
    }
    Ok((component, version.to_string()))
}
