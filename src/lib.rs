pub mod build;
pub mod capability;
pub mod checksum;
pub mod cli;
pub mod client;
pub mod config;
pub mod manifest;
pub mod parser;
pub mod scenario;
pub mod server;

pub use crate::manifest::{Component, Manifest};
pub use crate::scenario::{Outcome, Scenario, ScenarioRunner};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
