//! End-to-end scenario runs against a scripted update client.
#![cfg(unix)]

mod common;

use common::*;

use ota_harness::capability::ExpectedResponses;
use ota_harness::config::HarnessConfig;
use ota_harness::manifest::{Component, InferenceClient, Manifest};
use ota_harness::scenario::{Outcome, Scenario, ScenarioRunner};

/// Test manifest advertising a new inference client served from the local
/// staging area; everything else stays at the base version.
fn inference_bump_manifest() -> Manifest {
    let mut manifest = base_manifest();
    manifest.manifest_version = "v0.0.2".to_string();
    manifest.inference_clients.insert(
        "v0.0.2".to_string(),
        InferenceClient {
            date: "2026-02-01".to_string(),
            url: "http://127.0.0.1:8000/inference_v0.0.2.tar.gz".to_string(),
        },
    );
    // Point the model at the new client so compatibility checks stay quiet
    if let Some(category) = manifest.models.get_mut("2b") {
        if let Some(model) = category.get_mut("base-2b") {
            model.inference_client = Some("v0.0.2".to_string());
        }
    }
    manifest
}

fn runner_for(env: &TestEnvironment, executable: &std::path::Path) -> ScenarioRunner {
    ScenarioRunner::new(
        HarnessConfig::default(),
        &executable.to_string_lossy(),
        &env.serve_dir,
    )
    .with_client_args(vec![env.state_file.to_string_lossy().into_owned()])
    .with_port(0)
}

#[test]
fn inference_upgrade_succeeds_and_others_skip() {
    let env = TestEnvironment::new();
    env.stage_tarball("inference_v0.0.2.tar.gz");

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    let client = write_fake_client(env.serve_dir.parent().unwrap(), true);
    let runner = runner_for(&env, &client);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![],
        with_capability: false,
    };

    let report = runner.run(&scenario).expect("scenario run failed");

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.outcomes[&Component::Bootstrap], Outcome::Skipped);
    assert_eq!(report.outcomes[&Component::Hypervisor], Outcome::Skipped);
    assert_eq!(report.outcomes[&Component::Cli], Outcome::Skipped);
    assert_eq!(report.outcomes[&Component::Inference], Outcome::Success);
    assert!(report.passed());
    assert!(report.capabilities.is_none());

    // Cleanup published the base manifest again
    let served = Manifest::from_path(&env.serve_dir.join("manifest.json")).unwrap();
    assert_eq!(served.manifest_version, "v0.0.1");
    assert_eq!(served.inference_clients.len(), 1);
}

#[test]
fn identical_manifests_skip_every_component() {
    let env = TestEnvironment::new();

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &base_manifest());

    let client = write_fake_client(env.serve_dir.parent().unwrap(), true);
    let runner = runner_for(&env, &client);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![],
        with_capability: false,
    };

    let report = runner.run(&scenario).expect("scenario run failed");

    assert_eq!(report.outcomes.len(), 4);
    assert!(report
        .outcomes
        .values()
        .all(|outcome| *outcome == Outcome::Skipped));
    assert!(report.passed());
}

#[test]
fn update_that_changes_nothing_is_a_failure() {
    let env = TestEnvironment::new();
    env.stage_tarball("inference_v0.0.2.tar.gz");

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    // Client reports success but never installs anything
    let client = write_fake_client(env.serve_dir.parent().unwrap(), false);
    let runner = runner_for(&env, &client);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![],
        with_capability: false,
    };

    let report = runner.run(&scenario).expect("scenario run failed");

    assert_eq!(report.outcomes[&Component::Bootstrap], Outcome::Skipped);
    match &report.outcomes[&Component::Inference] {
        Outcome::Failure(detail) => {
            assert!(detail.contains("v0.0.2"), "detail was: {}", detail);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!report.passed());
    assert_eq!(report.failure_count(), 1);
}

#[test]
fn component_subset_limits_classification() {
    let env = TestEnvironment::new();
    env.stage_tarball("inference_v0.0.2.tar.gz");

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    let client = write_fake_client(env.serve_dir.parent().unwrap(), true);
    let runner = runner_for(&env, &client);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![Component::Inference],
        with_capability: false,
    };

    let report = runner.run(&scenario).expect("scenario run failed");

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[&Component::Inference], Outcome::Success);
}

#[test]
fn missing_staged_tarball_aborts_before_client_starts() {
    let env = TestEnvironment::new();
    // Deliberately no inference_v0.0.2.tar.gz in the serve directory

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    // Executable that would fail loudly if spawned
    let runner = ScenarioRunner::new(HarnessConfig::default(), "/nonexistent/client", &env.serve_dir)
        .with_port(0);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![],
        with_capability: false,
    };

    let err = runner.run(&scenario).unwrap_err();
    assert!(
        format!("{:#}", err).contains("inference_v0.0.2.tar.gz"),
        "unexpected error: {:#}",
        err
    );
}

#[test]
fn capability_probes_report_independently_of_update_outcomes() {
    let env = TestEnvironment::new();
    env.stage_tarball("inference_v0.0.2.tar.gz");

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    let expectations_path = env.path("expected_responses.json");
    write_expected_responses(&expectations_path);
    let expectations = ExpectedResponses::load(&expectations_path).unwrap();

    let client = write_fake_client(env.serve_dir.parent().unwrap(), true);
    let runner = runner_for(&env, &client).with_expectations(Some(expectations));

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![],
        with_capability: true,
    };

    let report = runner.run(&scenario).expect("scenario run failed");
    assert_eq!(report.outcomes[&Component::Inference], Outcome::Success);

    // One result per probe: three caption lengths, query, detect, point
    let capabilities = report.capabilities.as_ref().expect("no capability report");
    assert_eq!(capabilities.results.len(), 6);
    assert!(capabilities
        .results
        .iter()
        .all(|result| result.model == "base-2b"));

    // The client answers "[]" where a point location is expected
    let point = capabilities
        .results
        .iter()
        .find(|result| result.probe == "point")
        .expect("point probe missing");
    assert!(!point.passed);
    assert_eq!(capabilities.pass_count(), 5);
    assert!(!capabilities.all_passed());

    // A failing probe never downgrades the update's own result
    assert!(report.passed());
}

#[test]
fn no_cleanup_leaves_test_manifest_published() {
    let env = TestEnvironment::new();
    env.stage_tarball("inference_v0.0.2.tar.gz");

    let base_path = env.path("base.json");
    let test_path = env.path("test.json");
    write_manifest(&base_path, &base_manifest());
    write_manifest(&test_path, &inference_bump_manifest());

    let client = write_fake_client(env.serve_dir.parent().unwrap(), true);
    let runner = runner_for(&env, &client).with_cleanup(false);

    let scenario = Scenario {
        base_manifest: base_path,
        test_manifest: test_path,
        components: vec![Component::Inference],
        with_capability: false,
    };

    runner.run(&scenario).expect("scenario run failed");

    let served = Manifest::from_path(&env.serve_dir.join("manifest.json")).unwrap();
    assert_eq!(served.manifest_version, "v0.0.2");
    assert!(served.inference_clients.contains_key("v0.0.2"));
}
