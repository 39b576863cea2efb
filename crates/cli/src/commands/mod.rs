pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;

use serde::Serialize;

use docflow_core::config::{AppConfig, LoadOptions};

/// What a subcommand hands back to the top-level runner: one JSON line for
/// stdout and the process exit code.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Failure classes shared by the db-touching commands. Each owns its exit
/// code so scripts can branch on `$?` without parsing the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    Runtime,
    Database,
    Migration,
    Seed,
}

impl FailureKind {
    fn label(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Runtime => "runtime",
            Self::Database => "database",
            Self::Migration => "migration",
            Self::Seed => "seed",
        }
    }

    fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::Runtime => 3,
            Self::Database => 4,
            Self::Migration => 5,
            Self::Seed => 6,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    command: &'a str,
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a str>,
    detail: &'a str,
}

impl CommandResult {
    pub fn ok(command: &str, detail: impl AsRef<str>) -> Self {
        let output = render(&Report {
            command,
            outcome: "ok",
            failure: None,
            detail: detail.as_ref(),
        });
        Self { exit_code: 0, output }
    }

    pub fn failed(command: &str, kind: FailureKind, detail: impl AsRef<str>) -> Self {
        let output = render(&Report {
            command,
            outcome: "failed",
            failure: Some(kind.label()),
            detail: detail.as_ref(),
        });
        Self { exit_code: kind.exit_code(), output }
    }
}

fn render(report: &Report<'_>) -> String {
    serde_json::to_string(report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"outcome\":\"failed\",\"failure\":\"render\",\"detail\":\"{}\"}}",
            report.command,
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, Box<CommandResult>> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        Box::new(CommandResult::failed(
            command,
            FailureKind::Config,
            format!("configuration issue: {error}"),
        ))
    })
}

pub(crate) fn runtime(command: &str) -> Result<tokio::runtime::Runtime, Box<CommandResult>> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        Box::new(CommandResult::failed(
            command,
            FailureKind::Runtime,
            format!("async runtime failed to start: {error}"),
        ))
    })
}
