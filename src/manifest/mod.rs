use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// An independently versioned deployable unit of the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Bootstrap,
    Hypervisor,
    Cli,
    Inference,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Bootstrap,
        Component::Hypervisor,
        Component::Cli,
        Component::Inference,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Bootstrap => "bootstrap",
            Component::Hypervisor => "hypervisor",
            Component::Cli => "cli",
            Component::Inference => "inference",
        }
    }

    /// Name as it appears in the client's `check-updates` output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Component::Bootstrap => "Bootstrap",
            Component::Hypervisor => "Hypervisor",
            Component::Cli => "CLI",
            Component::Inference => "Inference",
        }
    }

    /// Key under which the installed version of this component is reported.
    /// The inference engine version only shows up in `get-config` output.
    pub fn version_key(&self) -> &'static str {
        match self {
            Component::Bootstrap => "bootstrap",
            Component::Hypervisor => "hypervisor",
            Component::Cli => "cli",
            Component::Inference => "inference_client",
        }
    }

    /// Target name handed to the external build script. The bootstrap and
    /// inference tarballs both come out of the `dev` target.
    pub fn build_target(&self) -> &'static str {
        match self {
            Component::Bootstrap | Component::Inference => "dev",
            Component::Hypervisor => "hypervisor",
            Component::Cli => "cli",
        }
    }

    /// Staged tarball filename for a given version.
    pub fn tarball_name(&self, version: &str) -> String {
        format!("{}_{}.tar.gz", self.name(), version)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bootstrap" => Ok(Component::Bootstrap),
            "hypervisor" => Ok(Component::Hypervisor),
            "cli" => Ok(Component::Cli),
            "inference" | "inference_client" => Ok(Component::Inference),
            _ => Err(format!("Unknown component: {}", s)),
        }
    }
}

/// A released build of a component: its version and where to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRelease {
    pub version: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceClient {
    pub date: String,
    pub url: String,
}

/// Per-model manifest entry. Only the fields the harness inspects are typed;
/// everything else rides along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub type ModelTable = BTreeMap<String, BTreeMap<String, ModelEntry>>;

/// Update manifest as served to the client: current component releases,
/// model catalog grouped by size class, and available inference clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: String,
    pub manifest_date: String,
    pub current_bootstrap: ComponentRelease,
    pub current_hypervisor: ComponentRelease,
    pub current_cli: ComponentRelease,
    #[serde(default)]
    pub models: ModelTable,
    #[serde(default)]
    pub inference_clients: BTreeMap<String, InferenceClient>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Manifest {
    /// Load a manifest from a local path or an http(s) URL.
    pub fn load(source: &str) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            debug!("Fetching manifest from {}", source);
            let manifest = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?
                .get(source)
                .send()
                .with_context(|| format!("Failed to fetch manifest from {}", source))?
                .error_for_status()?
                .json()?;
            Ok(manifest)
        } else {
            Self::from_path(Path::new(source))
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(())
    }

    pub fn release(&self, component: Component) -> Option<&ComponentRelease> {
        match component {
            Component::Bootstrap => Some(&self.current_bootstrap),
            Component::Hypervisor => Some(&self.current_hypervisor),
            Component::Cli => Some(&self.current_cli),
            Component::Inference => None,
        }
    }

    pub fn release_mut(&mut self, component: Component) -> Option<&mut ComponentRelease> {
        match component {
            Component::Bootstrap => Some(&mut self.current_bootstrap),
            Component::Hypervisor => Some(&mut self.current_hypervisor),
            Component::Cli => Some(&mut self.current_cli),
            Component::Inference => None,
        }
    }

    /// Version this manifest advertises for a component. For the inference
    /// engine that is the newest entry in `inference_clients`.
    pub fn component_version(&self, component: Component) -> Option<String> {
        match component {
            Component::Inference => self
                .latest_inference_client()
                .map(|(version, _)| version.clone()),
            _ => self.release(component).map(|r| r.version.clone()),
        }
    }

    /// Download URL this manifest advertises for a component.
    pub fn component_url(&self, component: Component) -> Option<String> {
        match component {
            Component::Inference => self
                .latest_inference_client()
                .map(|(_, client)| client.url.clone()),
            _ => self.release(component).map(|r| r.url.clone()),
        }
    }

    pub fn latest_inference_client(&self) -> Option<(&String, &InferenceClient)> {
        self.inference_clients
            .iter()
            .max_by_key(|(version, _)| parse_version(version))
    }

    /// Whether any model in the catalog targets the given inference client.
    pub fn model_uses_client(&self, version: &str) -> bool {
        self.models.values().any(|category| {
            category
                .values()
                .any(|model| model.inference_client.as_deref() == Some(version))
        })
    }
}

/// Numeric pieces of a version string, for ordering. "v0.0.12" sorts after
/// "v0.0.9" where plain string comparison would not.
pub fn parse_version(version: &str) -> Vec<u64> {
    version
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect()
}

/// Check the documented cross-manifest invariant: the test manifest must keep
/// every inference client the base manifest had, and at least one model must
/// target the newest client. Violations make capability checks meaningless,
/// so they are reported as warnings rather than enforced.
pub fn check_client_compatibility(base: &Manifest, test: &Manifest) -> Vec<String> {
    let mut warnings = Vec::new();

    for version in base.inference_clients.keys() {
        if !test.inference_clients.contains_key(version) {
            warnings.push(format!(
                "test manifest drops inference client {} present in base manifest",
                version
            ));
        }
    }

    if let Some((newest, _)) = test.latest_inference_client() {
        if !test.model_uses_client(newest) {
            warnings.push(format!(
                "no model in the test manifest targets the newest inference client {}",
                newest
            ));
        }
    }

    warnings
}

/// A tarball placed in the staging area by the builder.
#[derive(Debug, Clone)]
pub struct StagedTarball {
    pub component: Component,
    pub version: String,
    pub path: PathBuf,
}

/// Derive a test manifest from a base manifest and a set of staged tarballs.
///
/// Each staged component gets its version bumped and its URL pointed at the
/// local file server. An inference tarball is spliced in as a new entry in
/// `inference_clients`; other components replace their `current_*` release.
pub fn generate_test_manifest(
    base: &Manifest,
    staged: &[StagedTarball],
    serve_url: &str,
    models: Option<ModelTable>,
    manifest_version: &str,
) -> Result<Manifest> {
    let mut manifest = base.clone();
    manifest.manifest_version = manifest_version.to_string();
    manifest.manifest_date = Utc::now().format("%Y-%m-%d").to_string();

    if let Some(models) = models {
        let total: usize = models.values().map(|category| category.len()).sum();
        if total == 0 {
            anyhow::bail!("replacement model table must contain at least one model");
        }
        manifest.models = models;
    }

    let serve_url = serve_url.trim_end_matches('/');
    for tarball in staged {
        let filename = tarball
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("staged tarball has no filename: {:?}", tarball.path))?;
        let url = format!("{}/{}", serve_url, filename);

        debug!(
            "Patching manifest: {} -> {} at {}",
            tarball.component, tarball.version, url
        );

        match tarball.component {
            Component::Inference => {
                if !manifest.model_uses_client(&tarball.version) {
                    warn!("No models use inference client {}", tarball.version);
                }
                let date = manifest
                    .inference_clients
                    .values()
                    .next()
                    .map(|client| client.date.clone())
                    .unwrap_or_else(|| manifest.manifest_date.clone());
                manifest
                    .inference_clients
                    .insert(tarball.version.clone(), InferenceClient { date, url });
            }
            component => {
                let release = manifest
                    .release_mut(component)
                    .expect("non-inference components always have a release");
                release.version = tarball.version.clone();
                release.url = url;
            }
        }
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_manifest() -> Manifest {
        Manifest {
            manifest_version: "v0.0.1".to_string(),
            manifest_date: "2026-01-01".to_string(),
            current_bootstrap: ComponentRelease {
                version: "v0.0.1".to_string(),
                url: "http://example.test/bootstrap.tar.gz".to_string(),
            },
            current_hypervisor: ComponentRelease {
                version: "v0.0.1".to_string(),
                url: "http://example.test/hypervisor.tar.gz".to_string(),
            },
            current_cli: ComponentRelease {
                version: "v0.0.1".to_string(),
                url: "http://example.test/cli.tar.gz".to_string(),
            },
            models: ModelTable::from([(
                "2b".to_string(),
                BTreeMap::from([(
                    "base-2b".to_string(),
                    ModelEntry {
                        inference_client: Some("v0.0.1".to_string()),
                        ..Default::default()
                    },
                )]),
            )]),
            inference_clients: BTreeMap::from([(
                "v0.0.1".to_string(),
                InferenceClient {
                    date: "2026-01-01".to_string(),
                    url: "http://example.test/inference.tar.gz".to_string(),
                },
            )]),
            notes: vec![],
        }
    }

    #[test]
    fn version_ordering_is_numeric() {
        assert!(parse_version("v0.0.12") > parse_version("v0.0.9"));
        assert!(parse_version("v1.0.0") > parse_version("v0.9.9"));
        assert_eq!(parse_version("v0.0.2"), vec![0, 0, 2]);
    }

    #[test]
    fn latest_inference_client_picks_numeric_max() {
        let mut manifest = sample_manifest();
        manifest.inference_clients.insert(
            "v0.0.10".to_string(),
            InferenceClient {
                date: "2026-02-01".to_string(),
                url: "http://example.test/inference10.tar.gz".to_string(),
            },
        );
        manifest.inference_clients.insert(
            "v0.0.9".to_string(),
            InferenceClient {
                date: "2026-01-15".to_string(),
                url: "http://example.test/inference9.tar.gz".to_string(),
            },
        );
        let (version, _) = manifest.latest_inference_client().unwrap();
        assert_eq!(version, "v0.0.10");
    }

    #[test]
    fn component_version_reads_release_or_client() {
        let manifest = sample_manifest();
        assert_eq!(
            manifest.component_version(Component::Cli).as_deref(),
            Some("v0.0.1")
        );
        assert_eq!(
            manifest.component_version(Component::Inference).as_deref(),
            Some("v0.0.1")
        );
    }

    #[test]
    fn generate_patches_component_and_inference() {
        let base = sample_manifest();
        let staged = vec![
            StagedTarball {
                component: Component::Hypervisor,
                version: "v0.0.2".to_string(),
                path: PathBuf::from("/staging/hypervisor_v0.0.2.tar.gz"),
            },
            StagedTarball {
                component: Component::Inference,
                version: "v0.0.2".to_string(),
                path: PathBuf::from("/staging/inference_v0.0.2.tar.gz"),
            },
        ];

        let manifest =
            generate_test_manifest(&base, &staged, "http://127.0.0.1:8000/", None, "v0.0.2")
                .unwrap();

        assert_eq!(manifest.manifest_version, "v0.0.2");
        assert_eq!(manifest.current_hypervisor.version, "v0.0.2");
        assert_eq!(
            manifest.current_hypervisor.url,
            "http://127.0.0.1:8000/hypervisor_v0.0.2.tar.gz"
        );
        // Base release untouched
        assert_eq!(manifest.current_cli.version, "v0.0.1");
        // New inference client spliced in alongside the old one
        assert_eq!(manifest.inference_clients.len(), 2);
        assert_eq!(
            manifest.inference_clients["v0.0.2"].url,
            "http://127.0.0.1:8000/inference_v0.0.2.tar.gz"
        );
    }

    #[test]
    fn generate_rejects_empty_model_table() {
        let base = sample_manifest();
        let result = generate_test_manifest(
            &base,
            &[],
            "http://127.0.0.1:8000",
            Some(ModelTable::new()),
            "v0.0.2",
        );
        assert!(result.is_err());
    }

    #[test]
    fn compatibility_flags_dropped_clients_and_orphan_models() {
        let base = sample_manifest();
        let mut test = sample_manifest();
        test.inference_clients.clear();
        test.inference_clients.insert(
            "v0.0.2".to_string(),
            InferenceClient {
                date: "2026-02-01".to_string(),
                url: "http://example.test/inference2.tar.gz".to_string(),
            },
        );
        // Models still reference v0.0.1
        let warnings = check_client_compatibility(&base, &test);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("drops inference client v0.0.1"));
        assert!(warnings[1].contains("newest inference client v0.0.2"));
    }

    #[test]
    fn roundtrips_through_json() {
        let manifest = sample_manifest();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        manifest.save(&path).unwrap();
        let reloaded = Manifest::from_path(&path).unwrap();
        assert_eq!(reloaded.manifest_version, manifest.manifest_version);
        assert_eq!(reloaded.current_cli, manifest.current_cli);
        assert_eq!(reloaded.inference_clients, manifest.inference_clients);
        assert_eq!(reloaded.models, manifest.models);
    }

    #[test]
    fn component_parsing() {
        assert_eq!("CLI".parse::<Component>().unwrap(), Component::Cli);
        assert_eq!(
            "inference_client".parse::<Component>().unwrap(),
            Component::Inference
        );
        assert!("kernel".parse::<Component>().is_err());
    }

    #[test]
    fn tarball_names_follow_convention() {
        assert_eq!(
            Component::Hypervisor.tarball_name("v0.0.2"),
            "hypervisor_v0.0.2.tar.gz"
        );
        assert_eq!(
            Component::Inference.tarball_name("v0.1.0"),
            "inference_v0.1.0.tar.gz"
        );
    }
}
