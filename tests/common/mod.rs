/// Shared fixtures for integration tests: manifest builders, staged tarball
/// stubs, and a scripted stand-in for the external update client.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use ota_harness::manifest::{
    ComponentRelease, InferenceClient, Manifest, ModelEntry, ModelTable,
};

/// Temporary serve directory plus the state file the scripted client reads
/// its installed inference version from.
pub struct TestEnvironment {
    _temp_dir: TempDir,
    pub serve_dir: PathBuf,
    pub state_file: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let serve_dir = temp_dir.path().join("tar_files");
        std::fs::create_dir_all(&serve_dir).expect("Failed to create serve dir");

        let state_file = temp_dir.path().join("installed_inference");
        std::fs::write(&state_file, "v0.0.1\n").expect("Failed to seed state file");

        TestEnvironment {
            _temp_dir: temp_dir,
            serve_dir,
            state_file,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self._temp_dir.path().join(relative)
    }

    /// Drop a stub tarball into the serve directory under the given name.
    pub fn stage_tarball(&self, name: &str) {
        std::fs::write(self.serve_dir.join(name), b"stub tarball contents")
            .expect("Failed to stage tarball");
    }
}

/// Manifest with every component at v0.0.1 and a single 2b model targeting
/// the v0.0.1 inference client.
pub fn base_manifest() -> Manifest {
    manifest_with_inference(&[("v0.0.1", "http://example.test/inference_v0.0.1.tar.gz")])
}

pub fn manifest_with_inference(clients: &[(&str, &str)]) -> Manifest {
    let inference_clients: BTreeMap<String, InferenceClient> = clients
        .iter()
        .map(|(version, url)| {
            (
                version.to_string(),
                InferenceClient {
                    date: "2026-01-01".to_string(),
                    url: url.to_string(),
                },
            )
        })
        .collect();

    let newest = clients
        .iter()
        .map(|(version, _)| version.to_string())
        .last()
        .unwrap_or_else(|| "v0.0.1".to_string());

    Manifest {
        manifest_version: "v0.0.1".to_string(),
        manifest_date: "2026-01-01".to_string(),
        current_bootstrap: ComponentRelease {
            version: "v0.0.1".to_string(),
            url: "http://example.test/bootstrap_v0.0.1.tar.gz".to_string(),
        },
        current_hypervisor: ComponentRelease {
            version: "v0.0.1".to_string(),
            url: "http://example.test/hypervisor_v0.0.1.tar.gz".to_string(),
        },
        current_cli: ComponentRelease {
            version: "v0.0.1".to_string(),
            url: "http://example.test/cli_v0.0.1.tar.gz".to_string(),
        },
        models: ModelTable::from([(
            "2b".to_string(),
            BTreeMap::from([(
                "base-2b".to_string(),
                ModelEntry {
                    inference_client: Some(newest),
                    release_date: Some("2026-01-01".to_string()),
                    model_size: Some("2b".to_string()),
                    ..Default::default()
                },
            )]),
        )]),
        inference_clients,
        notes: vec![],
    }
}

pub fn write_manifest(path: &Path, manifest: &Manifest) {
    manifest.save(path).expect("Failed to write manifest");
}

/// Expected probe responses matching the scripted client's canned output,
/// except that `point` demands an answer the client never gives.
pub fn write_expected_responses(path: &Path) {
    let json = r#"{
        "image_url": "probe.png",
        "keyword_threshold": 0.7,
        "caption_length_ranges": {
            "short": {"min_words": 1, "max_words": 6}
        },
        "models": {
            "base-2b": {
                "caption_short": {"keywords": ["logo"]},
                "caption_normal": {"keywords": ["logo", "dark"]},
                "caption_long": {"keywords": ["logo", "background"]},
                "query": {"keywords": ["logo"]},
                "detect": "[]",
                "point": "face at (0.5, 0.5)"
            }
        }
    }"#;
    std::fs::write(path, json).expect("Failed to write expected responses");
}

/// Scripted client speaking the station CLI protocol: prompt, admin and
/// probe commands, and an exit banner. The installed inference version lives in
/// the state file passed as the first argument; `admin update --confirm`
/// rewrites it when `bump_on_update` is set, modeling a working or a broken
/// updater respectively.
#[cfg(unix)]
pub fn write_fake_client(dir: &Path, bump_on_update: bool) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bump_line = if bump_on_update {
        r#"printf 'v0.0.2\n' > "$STATE""#
    } else {
        ": # updater applies nothing"
    };

    let script = format!(
        r#"#!/usr/bin/env bash
STATE="$1"
echo "station CLI ready"
printf 'station> '
while IFS= read -r line; do
  case "$line" in
    "admin update-manifest")
      echo "Manifest updated"
      ;;
    "admin check-updates")
      echo "Bootstrap: v0.0.1 - Up to date"
      echo "Hypervisor: v0.0.1 - Up to date"
      echo "CLI: v0.0.1 - Up to date"
      ;;
    "admin get-config")
      echo "active_bootstrap: v0.0.1"
      echo "active_hypervisor: v0.0.1"
      echo "active_cli: v0.0.1"
      echo "active_inference_client: $(cat "$STATE")"
      echo "active_model: base-2b"
      ;;
    "admin model-list")
      echo "Model: base-2b"
      echo "  Release Date: 2026-01-01"
      echo "  Size: 2b"
      ;;
    "admin model-use "*)
      echo "Model initialization completed successfully"
      ;;
    "caption "*"--length short")
      echo "A dark logo"
      ;;
    "caption "*"--length normal")
      echo "A dark circular logo on a plain background"
      ;;
    "caption "*"--length long")
      echo "Generating streaming caption..."
      echo "A dark circular logo centered on a plain light background"
      ;;
    "query "*)
      echo "A dark logo"
      ;;
    "detect "*)
      echo "[]"
      ;;
    "point "*)
      echo "[]"
      ;;
    "admin update --confirm")
      {bump_line}
      echo "All component updates have been processed"
      ;;
    "exit")
      echo "Exiting station CLI"
      exit 0
      ;;
    *)
      echo "Unknown command: $line"
      ;;
  esac
  printf 'station> '
done
"#
    );

    let path = dir.join("fake-station.sh");
    std::fs::write(&path, script).expect("Failed to write fake client");
    let mut perms = std::fs::metadata(&path)
        .expect("Failed to stat fake client")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("Failed to chmod fake client");
    path
}
