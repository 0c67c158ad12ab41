use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Interaction parameters for the external update client.
///
/// Everything here can be overridden from a TOML file so the harness can
/// drive differently branded builds of the client without recompiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Prompt the client prints when ready for a command (matched literally).
    pub prompt: String,
    /// Message printed by a clean `exit`.
    pub exit_message: String,
    pub status: StatusIndicators,
    pub completion: CompletionPatterns,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusIndicators {
    pub up_to_date: String,
    pub update_available: String,
}

/// Regex patterns that mark the end of each update flavor in client output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPatterns {
    pub bootstrap: String,
    pub hypervisor: String,
    /// `admin update` covers both component and CLI updates, so this pattern
    /// accepts either completion message.
    pub full: String,
    pub model_switch: String,
}

/// Timeout classes in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub quick: u64,
    pub standard: u64,
    pub startup: u64,
    pub update: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            prompt: "station>".to_string(),
            exit_message: "Exiting station CLI".to_string(),
            status: StatusIndicators::default(),
            completion: CompletionPatterns::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for StatusIndicators {
    fn default() -> Self {
        Self {
            up_to_date: "Up to date".to_string(),
            update_available: "Update available".to_string(),
        }
    }
}

impl Default for CompletionPatterns {
    fn default() -> Self {
        Self {
            bootstrap: r"(Restart.*for update|Starting update process)".to_string(),
            hypervisor: r"Hypervisor.*update.*completed".to_string(),
            full: r"(All component updates have been processed|CLI update complete\. Please restart the CLI)"
                .to_string(),
            model_switch: r"Model initialization completed successfully".to_string(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            quick: 15,
            standard: 60,
            startup: 100,
            update: 300,
        }
    }
}

impl Timeouts {
    pub fn quick(&self) -> Duration {
        Duration::from_secs(self.quick)
    }

    pub fn standard(&self) -> Duration {
        Duration::from_secs(self.standard)
    }

    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.startup)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }
}

impl HarnessConfig {
    /// The prompt as an anchored regex, for expect-style matching.
    pub fn prompt_regex(&self) -> Result<Regex, crate::HarnessError> {
        Regex::new(&regex::escape(&self.prompt))
            .map_err(|e| crate::HarnessError::Config(format!("invalid prompt pattern: {}", e)))
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HarnessConfig, crate::HarnessError> {
    let contents = std::fs::read_to_string(path)?;
    let config: HarnessConfig = toml::from_str(&contents)
        .map_err(|e| crate::HarnessError::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}
