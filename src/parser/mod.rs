use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

use crate::config::StatusIndicators;

/// Update state reported per component by `admin check-updates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    UpdateAvailable,
}

/// Parse `check-updates` output into component display name -> status.
pub fn parse_update_status(
    output: &str,
    indicators: &StatusIndicators,
) -> HashMap<String, UpdateStatus> {
    let mut status = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((component, rest)) = line.split_once(':') else {
            continue;
        };
        let status_value = if rest.contains(&indicators.update_available) {
            UpdateStatus::UpdateAvailable
        } else if rest.contains(&indicators.up_to_date) {
            UpdateStatus::UpToDate
        } else {
            continue;
        };
        status.insert(component.trim().to_string(), status_value);
    }
    debug!("Parsed update status: {:?}", status);
    status
}

/// Extract component versions from `check-updates` output lines like
/// `Hypervisor: v0.0.2 - Up to date`. Keys are lowercased display names.
pub fn parse_versions_from_check_updates(output: &str) -> HashMap<String, String> {
    let pattern = Regex::new(r"(?m)^\s*(Bootstrap|Hypervisor|CLI):\s+(v[\d.]+)")
        .expect("check-updates version pattern is valid");

    let versions: HashMap<String, String> = pattern
        .captures_iter(output)
        .map(|captures| {
            (
                captures[1].to_lowercase(),
                captures[2].to_string(),
            )
        })
        .collect();

    debug!("Parsed versions from check-updates: {:?}", versions);
    versions
}

/// Extract installed versions from `get-config` output lines like
/// `active_inference_client: v0.0.2`.
pub fn parse_versions_from_config(output: &str) -> HashMap<String, String> {
    let pattern =
        Regex::new(r"(?m)^\s*active_(bootstrap|hypervisor|cli|inference_client):\s+(v[\d.]+)")
            .expect("get-config version pattern is valid");

    let versions: HashMap<String, String> = pattern
        .captures_iter(output)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
        .collect();

    debug!("Parsed versions from get-config: {:?}", versions);
    versions
}

/// Parse `get-config` output into a generic key -> value map.
pub fn parse_config(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() || key.contains(' ') {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Model fields reported by `admin model-list`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelListing {
    pub release_date: Option<String>,
    pub model_size: Option<String>,
    pub notes: Option<String>,
}

/// Parse `model-list` output blocks of the form:
///
/// ```text
/// Model: base-2b
///   Release Date: 2026-01-01
///   Size: 2b
///   Notes: baseline
/// ```
pub fn parse_model_list(output: &str) -> HashMap<String, ModelListing> {
    let mut models = HashMap::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("Model: ") {
            let name = name.trim().to_string();
            models.insert(name.clone(), ModelListing::default());
            current = Some(name);
        } else if let Some(name) = &current {
            let entry = models.get_mut(name).expect("current model was inserted");
            if let Some(value) = line.strip_prefix("Release Date: ") {
                entry.release_date = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Size: ") {
                entry.model_size = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Notes: ") {
                entry.notes = Some(value.trim().to_string());
            }
        }
    }

    debug!("Parsed {} models from model-list", models.len());
    models
}
