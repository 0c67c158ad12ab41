use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::client::Session;
use crate::parser;

pub const DEFAULT_KEYWORD_THRESHOLD: f64 = 0.7;

/// Inference probes stream model output and can take a while.
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Expected probe responses, loaded from JSON. Keyed by model name, with a
/// shared probe image and caption length gates.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedResponses {
    /// Image every probe runs against.
    pub image_url: String,
    #[serde(default)]
    pub keyword_threshold: Option<f64>,
    #[serde(default)]
    pub caption_length_ranges: BTreeMap<String, LengthRange>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelExpectations>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LengthRange {
    #[serde(default)]
    pub min_words: usize,
    pub max_words: Option<usize>,
    #[serde(default)]
    pub min_chars: usize,
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelExpectations {
    pub caption_short: Expectation,
    pub caption_normal: Expectation,
    pub caption_long: Expectation,
    pub query: Expectation,
    pub detect: String,
    pub point: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ExpectedResponses {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read expected responses {}", path.display()))?;
        let responses = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse expected responses {}", path.display()))?;
        Ok(responses)
    }

    pub fn threshold(&self) -> f64 {
        self.keyword_threshold.unwrap_or(DEFAULT_KEYWORD_THRESHOLD)
    }
}

/// Result of one probe against one model.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub model: String,
    pub probe: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityReport {
    pub results: Vec<ProbeResult>,
}

impl CapabilityReport {
    pub fn pass_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

/// Fraction of expected keywords present in the output (case-insensitive).
pub fn keyword_check(output: &str, keywords: &[String], threshold: f64) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = output.to_lowercase();
    let matches = keywords
        .iter()
        .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
        .count();
    matches as f64 >= keywords.len() as f64 * threshold
}

/// Whether a caption's word and character counts fall inside a length gate.
pub fn length_check(output: &str, range: &LengthRange) -> bool {
    let words = output.split_whitespace().count();
    let chars = output.chars().count();
    words >= range.min_words
        && range.max_words.map_or(true, |max| words <= max)
        && chars >= range.min_chars
        && range.max_chars.map_or(true, |max| chars <= max)
}

/// Strip progress chatter from probe output, keeping the response text.
pub fn clean_response(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("Generating")
                && !line.starts_with("Processing")
                && !line.starts_with("Downloading")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run the capability probe suite against every model the expectations file
/// knows about: query, caption at three lengths, detect, point. Each probe
/// reports independently; a failing probe never aborts the suite.
pub fn run_suite(session: &mut Session, expectations: &ExpectedResponses) -> CapabilityReport {
    let mut report = CapabilityReport::default();

    let listed = match session.model_list() {
        Ok(output) => parser::parse_model_list(output.as_str()),
        Err(e) => {
            warn!("model-list failed, skipping capability probes: {}", e);
            return report;
        }
    };

    // Remember the active model so the suite leaves the client as it found it.
    let original = session
        .get_config()
        .ok()
        .and_then(|output| parser::parse_config(&output).get("active_model").cloned());

    for (model, expected) in &expectations.models {
        if !listed.contains_key(model) {
            debug!("Model {} not present in client, skipping", model);
            continue;
        }
        if let Err(e) = session.model_use(model) {
            report.results.push(ProbeResult {
                model: model.clone(),
                probe: "model-use".to_string(),
                passed: false,
                detail: e.to_string(),
            });
            continue;
        }
        probe_model(session, expectations, model, expected, &mut report);
    }

    if let Some(original) = original {
        if expectations.models.contains_key(&original) || listed.contains_key(&original) {
            if let Err(e) = session.model_use(&original) {
                warn!("Failed to restore original model {}: {}", original, e);
            }
        }
    }

    report
}

fn probe_model(
    session: &mut Session,
    expectations: &ExpectedResponses,
    model: &str,
    expected: &ModelExpectations,
    report: &mut CapabilityReport,
) {
    let image = &expectations.image_url;
    let threshold = expectations.threshold();

    let captions = [
        ("caption short", "short", &expected.caption_short),
        ("caption normal", "normal", &expected.caption_normal),
        ("caption long", "long", &expected.caption_long),
    ];
    for (probe, length, expectation) in captions {
        let command = format!("caption {} --length {}", image, length);
        let result = run_probe(session, &command, |output| {
            let keywords_ok = keyword_check(output, &expectation.keywords, threshold);
            let range = expectations.caption_length_ranges.get(length);
            let length_ok = range.map_or(true, |range| length_check(output, range));
            match (keywords_ok, length_ok) {
                (true, true) => Ok(()),
                (false, _) => Err("keyword threshold not met".to_string()),
                (_, false) => Err(format!("caption length outside {} range", length)),
            }
        });
        push_result(report, model, probe, result);
    }

    let query = format!("query \"What is in this image?\" {}", image);
    let result = run_probe(session, &query, |output| {
        if keyword_check(output, &expected.query.keywords, threshold) {
            Ok(())
        } else {
            Err("keyword threshold not met".to_string())
        }
    });
    push_result(report, model, "query", result);

    let exact = [
        ("detect", format!("detect face {}", image), &expected.detect),
        ("point", format!("point face {}", image), &expected.point),
    ];
    for (probe, command, expected_output) in exact {
        let result = run_probe(session, &command, |output| {
            if output == expected_output.as_str() {
                Ok(())
            } else {
                Err(format!("expected '{}', got '{}'", expected_output, output))
            }
        });
        push_result(report, model, probe, result);
    }
}

fn run_probe(
    session: &mut Session,
    command: &str,
    validate: impl FnOnce(&str) -> std::result::Result<(), String>,
) -> std::result::Result<String, String> {
    match session.command(command, PROBE_TIMEOUT) {
        Ok(output) => {
            let cleaned = clean_response(&output);
            validate(&cleaned).map(|_| cleaned)
        }
        Err(e) => Err(e.to_string()),
    }
}

fn push_result(
    report: &mut CapabilityReport,
    model: &str,
    probe: &str,
    result: std::result::Result<String, String>,
) {
    let (passed, detail) = match result {
        Ok(output) => (true, output),
        Err(detail) => (false, detail),
    };
    debug!(
        "{} {} -> {}",
        model,
        probe,
        if passed { "pass" } else { "fail" }
    );
    report.results.push(ProbeResult {
        model: model.to_string(),
        probe: probe.to_string(),
        passed,
        detail,
    });
}
