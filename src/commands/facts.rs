use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::FactsCommands;
use crate::config::{load_document, AppConfig};
use crate::facts::{parser, Dialect, FactCollector, HostTarget};
use crate::inventory::{FactSet, HostFacts};
use crate::output::{output_data, print_info, print_success, print_warning};

/// Targets as a bare list, or under a `targets` key (the only shape TOML allows).
#[derive(Deserialize)]
#[serde(untagged)]
enum TargetsFile {
    List(Vec<HostTarget>),
    Table { targets: Vec<HostTarget> },
}

pub fn load_targets(path: &Path) -> Result<Vec<HostTarget>, Box<dyn std::error::Error>> {
    let targets = match load_document::<TargetsFile>(path)? {
        TargetsFile::List(targets) | TargetsFile::Table { targets } => targets,
    };
    Ok(targets)
}

#[derive(Serialize)]
struct ParsedCapture {
    ip: String,
    facts: HostFacts,
}

pub fn handle_facts_command(cmd: &FactsCommands, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        FactsCommands::Collect { targets, workers, no_winrm, format, output } => {
            let targets = load_targets(targets)?;
            let mut collector_config = config.collector.clone();
            if let Some(workers) = workers {
                collector_config.workers = *workers;
            }
            if *no_winrm {
                collector_config.winrm_fallback = false;
            }

            info!(
                hosts = targets.len(),
                workers = collector_config.workers,
                winrm_fallback = collector_config.winrm_fallback,
                "starting fact collection"
            );
            let collector = FactCollector::from_config(&collector_config)?;
            let facts = collector.collect_blocking(&targets)?;

            if output.is_some() {
                report_outcome(&facts, targets.len());
            }
            output_data(&facts, format, output.as_deref())?;
        }

        FactsCommands::Parse { input, dialect, format } => {
            let dialect = match dialect.as_str() {
                "powershell" => Dialect::PowerShell,
                _ => Dialect::Posix,
            };
            let raw = fs::read_to_string(input)?;
            let raw = match dialect {
                Dialect::Posix => with_crlf(&raw),
                Dialect::PowerShell => raw,
            };
            let (ip, facts) = parser::parse(&raw, dialect)?;
            output_data(&ParsedCapture { ip, facts }, format, None)?;
        }
    }
    Ok(())
}

fn report_outcome(facts: &FactSet, attempted: usize) {
    print_success(&format!("Collected facts from {} of {} host(s)", facts.len(), attempted));
    for error in &facts.errors {
        print_warning(&format!("{} ({}): {}", error.host, error.ip, error.error));
    }
    if facts.errors.is_empty() {
        print_info("No host errors");
    }
}

/// A pty emits CRLF; captures saved through an editor often lose the CR.
fn with_crlf(raw: &str) -> String {
    if raw.contains("\r\n") {
        return raw.to_string();
    }
    raw.replace('\n', "\r\n")
}
