use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::build;
use crate::capability::{self, CapabilityReport, ExpectedResponses};
use crate::client::{Session, UpdateKind};
use crate::config::HarnessConfig;
use crate::manifest::{self, Component, Manifest};
use crate::parser;
use crate::server::FileServer;
use crate::HarnessError;

/// Name under which the currently served manifest is published. The client
/// is pointed at this file; swapping its contents is how the harness moves
/// the world from base to test.
pub const CURRENT_MANIFEST: &str = "manifest.json";

/// One base -> test manifest pair exercised as a single test pass.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub base_manifest: PathBuf,
    pub test_manifest: PathBuf,
    /// Components under test; empty means all.
    pub components: Vec<Component>,
    pub with_capability: bool,
}

impl Scenario {
    pub fn components(&self) -> Vec<Component> {
        if self.components.is_empty() {
            Component::ALL.to_vec()
        } else {
            let mut components: Vec<Component> = Component::ALL
                .into_iter()
                .filter(|c| self.components.contains(c))
                .collect();
            components.dedup();
            components
        }
    }
}

/// Expected movement of one component between the two manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Versions identical (or absent from both); nothing should happen.
    Unchanged,
    /// Test manifest advertises a different version.
    Upgrade { from: Option<String>, to: String },
    /// Component disappeared from the test manifest.
    Dropped,
}

pub fn expected_transition(base: Option<&str>, test: Option<&str>) -> Transition {
    match (base, test) {
        (None, None) => Transition::Unchanged,
        (Some(base), Some(test)) if base == test => Transition::Unchanged,
        (base, Some(test)) => Transition::Upgrade {
            from: base.map(str::to_string),
            to: test.to_string(),
        },
        (Some(_), None) => Transition::Dropped,
    }
}

/// Final classification of one component in one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
    Skipped,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub outcomes: BTreeMap<Component, Outcome>,
    pub capabilities: Option<CapabilityReport>,
}

impl ScenarioReport {
    /// Update outcomes only; capability probe failures are reported
    /// separately and never downgrade an update's Success.
    pub fn passed(&self) -> bool {
        !self.outcomes.values().any(Outcome::is_failure)
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failure()).count()
    }
}

/// Sequences one scenario end to end: serve the staged artifacts, walk the
/// external client from the base manifest to the test manifest, classify
/// every component, optionally probe capabilities.
pub struct ScenarioRunner {
    config: HarnessConfig,
    executable: String,
    client_args: Vec<String>,
    serve_dir: PathBuf,
    port: u16,
    expectations: Option<ExpectedResponses>,
    cleanup: bool,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig, executable: &str, serve_dir: impl AsRef<Path>) -> Self {
        Self {
            config,
            executable: executable.to_string(),
            client_args: Vec::new(),
            serve_dir: serve_dir.as_ref().to_path_buf(),
            port: 8000,
            expectations: None,
            cleanup: true,
        }
    }

    pub fn with_client_args(mut self, args: Vec<String>) -> Self {
        self.client_args = args;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_expectations(mut self, expectations: Option<ExpectedResponses>) -> Self {
        self.expectations = expectations;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        let base = Manifest::from_path(&scenario.base_manifest)?;
        let test = Manifest::from_path(&scenario.test_manifest)?;

        for warning in manifest::check_client_compatibility(&base, &test) {
            warn!("{}", warning);
        }

        let components = scenario.components();
        let transitions: BTreeMap<Component, Transition> = components
            .iter()
            .map(|&component| {
                let base_version = base.component_version(component);
                let test_version = test.component_version(component);
                (
                    component,
                    expected_transition(base_version.as_deref(), test_version.as_deref()),
                )
            })
            .collect();

        self.check_referenced_tarballs(&test, &transitions)?;

        // Publish the base manifest first so the client starts from a known
        // world, then bring the server up. The server guard outlives every
        // early return below.
        base.save(&self.serve_dir.join(CURRENT_MANIFEST))?;
        let server = FileServer::start(&self.serve_dir, self.port)?;
        let manifest_url = server.url_for(CURRENT_MANIFEST);
        info!("Serving update source at {}", server.base_url());

        let result = self.drive(scenario, &test, &transitions, &manifest_url);

        if self.cleanup {
            if let Err(e) = base.save(&self.serve_dir.join(CURRENT_MANIFEST)) {
                warn!("Failed to restore base manifest after run: {}", e);
            }
        }

        result
    }

    fn drive(
        &self,
        scenario: &Scenario,
        test: &Manifest,
        transitions: &BTreeMap<Component, Transition>,
        manifest_url: &str,
    ) -> Result<ScenarioReport> {
        let mut client_args = self.client_args.clone();
        client_args.push("--manifest-url".to_string());
        client_args.push(manifest_url.to_string());

        let mut session = Session::spawn(&self.executable, &client_args, &self.config)?;
        session.update_manifest()?;

        self.verify_baseline(&mut session, transitions);

        // Switch the served manifest to the test version and let the client
        // pick it up.
        test.save(&self.serve_dir.join(CURRENT_MANIFEST))?;
        session.update_manifest()?;
        self.log_advertised_updates(&mut session, transitions);

        let mut report = ScenarioReport::default();
        for (&component, transition) in transitions {
            let outcome = match transition {
                Transition::Unchanged => Outcome::Skipped,
                Transition::Dropped => {
                    Outcome::Failure("component missing from test manifest".to_string())
                }
                Transition::Upgrade { to, .. } => {
                    info!("Updating {} to {}", component, to);
                    match self.apply_and_verify(&mut session, &client_args, component, to) {
                        Ok(()) => Outcome::Success,
                        Err(e) => Outcome::Failure(format!("{:#}", e)),
                    }
                }
            };
            match &outcome {
                Outcome::Success => info!("{}: success", component),
                Outcome::Skipped => debug!("{}: skipped", component),
                Outcome::Failure(detail) => warn!("{}: failure ({})", component, detail),
            }
            report.outcomes.insert(component, outcome);
        }

        if scenario.with_capability {
            if let Some(expectations) = &self.expectations {
                info!("Running capability probes");
                report.capabilities = Some(capability::run_suite(&mut session, expectations));
            } else {
                warn!("Capability probes requested but no expected responses loaded");
            }
        }

        session.shutdown();
        Ok(report)
    }

    /// Apply the update for one component, respawn the client if the update
    /// took it down, and check the installed version landed where the test
    /// manifest says it should.
    fn apply_and_verify(
        &self,
        session: &mut Session,
        client_args: &[String],
        component: Component,
        expected_version: &str,
    ) -> Result<()> {
        let kind = match component {
            Component::Bootstrap => UpdateKind::Bootstrap,
            Component::Hypervisor => UpdateKind::Hypervisor,
            Component::Cli | Component::Inference => UpdateKind::Full,
        };
        session.run_update(kind)?;

        if !session.is_alive() {
            debug!("Respawning client after {} update", component);
            *session = Session::spawn(&self.executable, client_args, &self.config)?;
        }

        let observed = installed_versions(session)?;
        match observed.get(component.version_key()) {
            Some(version) if version == expected_version => Ok(()),
            Some(version) => Err(HarnessError::Client(format!(
                "expected {} {}, client reports {}",
                component, expected_version, version
            ))
            .into()),
            None => Err(HarnessError::Client(format!(
                "client did not report a version for {} after update",
                component
            ))
            .into()),
        }
    }

    /// Pre-update sanity check: installed versions should match the base
    /// manifest. Divergence is logged, not fatal; the classification below
    /// still compares against the test manifest.
    fn verify_baseline(&self, session: &mut Session, transitions: &BTreeMap<Component, Transition>) {
        let observed = match installed_versions(session) {
            Ok(observed) => observed,
            Err(e) => {
                warn!("Could not read baseline versions: {}", e);
                return;
            }
        };
        for (component, transition) in transitions {
            let expected = match transition {
                Transition::Unchanged => continue,
                Transition::Dropped => continue,
                Transition::Upgrade { from, .. } => from.as_deref(),
            };
            if let (Some(expected), Some(actual)) =
                (expected, observed.get(component.version_key()))
            {
                if actual != expected {
                    warn!(
                        "Baseline mismatch for {}: base manifest says {}, client reports {}",
                        component, expected, actual
                    );
                }
            }
        }
    }

    fn log_advertised_updates(
        &self,
        session: &mut Session,
        transitions: &BTreeMap<Component, Transition>,
    ) {
        let output = match session.check_updates() {
            Ok(output) => output,
            Err(e) => {
                warn!("check-updates failed: {}", e);
                return;
            }
        };
        let status = parser::parse_update_status(&output, &self.config.status);
        for (component, transition) in transitions {
            // Inference updates surface through the model row, which the
            // harness does not track per component.
            if *component == Component::Inference {
                continue;
            }
            let advertised = status.get(component.display_name());
            let expects_update = matches!(transition, Transition::Upgrade { .. });
            match advertised {
                Some(parser::UpdateStatus::UpdateAvailable) if !expects_update => {
                    warn!("{} advertises an update but none is expected", component)
                }
                Some(parser::UpdateStatus::UpToDate) if expects_update => {
                    warn!("{} expected an update but client reports up to date", component)
                }
                None => debug!("{} missing from check-updates output", component),
                _ => {}
            }
        }
    }

    /// Staged tarballs referenced by the test manifest for components that
    /// will actually update must exist before the scenario runs.
    fn check_referenced_tarballs(
        &self,
        test: &Manifest,
        transitions: &BTreeMap<Component, Transition>,
    ) -> Result<()> {
        let mut required = Vec::new();
        for (&component, transition) in transitions {
            let Transition::Upgrade { to, .. } = transition else {
                continue;
            };
            let Some(raw) = test.component_url(component) else {
                continue;
            };
            let Ok(url) = Url::parse(&raw) else {
                warn!("Unparseable {} url in test manifest: {}", component, raw);
                continue;
            };
            // Only artifacts served by this harness are checked; remote URLs
            // are someone else's problem.
            if !matches!(url.host_str(), Some("127.0.0.1") | Some("localhost")) {
                continue;
            }
            if let Some(filename) = url.path_segments().and_then(|segments| segments.last()) {
                debug!("Scenario requires staged tarball {}", filename);
            }
            required.push((component, to.clone()));
        }
        build::validate_staging(&self.serve_dir, &required)
            .context("staging area incomplete for this scenario")
    }
}

/// Merge installed versions from `check-updates` and `get-config`. The
/// inference client version only appears in the latter.
pub fn installed_versions(session: &mut Session) -> Result<HashMap<String, String>> {
    let mut versions = parser::parse_versions_from_check_updates(&session.check_updates()?);
    versions.extend(parser::parse_versions_from_config(&session.get_config()?));
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_versions_are_unchanged() {
        assert_eq!(
            expected_transition(Some("v0.0.1"), Some("v0.0.1")),
            Transition::Unchanged
        );
        assert_eq!(expected_transition(None, None), Transition::Unchanged);
    }

    #[test]
    fn differing_versions_upgrade() {
        assert_eq!(
            expected_transition(Some("v0.0.1"), Some("v0.0.2")),
            Transition::Upgrade {
                from: Some("v0.0.1".to_string()),
                to: "v0.0.2".to_string(),
            }
        );
        // A component newly introduced by the test manifest still upgrades
        assert_eq!(
            expected_transition(None, Some("v0.0.2")),
            Transition::Upgrade {
                from: None,
                to: "v0.0.2".to_string(),
            }
        );
    }

    #[test]
    fn dropped_component_is_flagged() {
        assert_eq!(
            expected_transition(Some("v0.0.1"), None),
            Transition::Dropped
        );
    }

    #[test]
    fn empty_component_list_means_all() {
        let scenario = Scenario {
            base_manifest: PathBuf::from("base.json"),
            test_manifest: PathBuf::from("test.json"),
            components: vec![],
            with_capability: false,
        };
        assert_eq!(scenario.components(), Component::ALL.to_vec());

        let subset = Scenario {
            components: vec![Component::Inference, Component::Cli],
            ..scenario
        };
        // Subset keeps canonical ordering
        assert_eq!(
            subset.components(),
            vec![Component::Cli, Component::Inference]
        );
    }

    #[test]
    fn report_pass_ignores_capability_failures() {
        let mut report = ScenarioReport::default();
        report.outcomes.insert(Component::Cli, Outcome::Skipped);
        report.outcomes.insert(Component::Inference, Outcome::Success);
        report.capabilities = Some(crate::capability::CapabilityReport {
            results: vec![crate::capability::ProbeResult {
                model: "base-2b".to_string(),
                probe: "query".to_string(),
                passed: false,
                detail: "keyword threshold not met".to_string(),
            }],
        });
        assert!(report.passed());

        report
            .outcomes
            .insert(Component::Bootstrap, Outcome::Failure("boom".to_string()));
        assert!(!report.passed());
        assert_eq!(report.failure_count(), 1);
    }
}
