use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "vm-inventory")]
#[command(about = "Collects cloud VM inventory and guest host facts into one report")]
pub struct Cli {
    /// Config file (TOML). Defaults to the per-user config if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Guest fact collection over SSH / WinRM
    #[command(subcommand)]
    Facts(FactsCommands),

    /// Cloud provider inventory (KTC, NHN, NCP)
    #[command(subcommand)]
    Cloud(CloudCommands),

    /// Merge inventory and facts into a report
    #[command(subcommand)]
    Report(ReportCommands),
}

#[derive(Subcommand)]
pub enum FactsCommands {
    /// Log into every target and collect host facts
    Collect {
        /// Targets file (JSON, YAML or TOML)
        #[arg(short, long)]
        targets: PathBuf,

        /// Hosts processed concurrently (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Disable the WinRM fallback
        #[arg(long)]
        no_winrm: bool,

        /// Output format (json, yaml, or pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a saved raw session capture
    Parse {
        /// File holding the raw output
        #[arg(short, long)]
        input: PathBuf,

        /// Output dialect of the capture
        #[arg(short, long, default_value = "posix", value_parser = ["posix", "powershell"])]
        dialect: String,

        /// Output format (json, yaml, or pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum CloudCommands {
    /// Fetch the instance inventory for every account in a credentials file
    Inventory {
        /// Credentials file (JSON, YAML or TOML)
        #[arg(short, long)]
        credentials: PathBuf,

        /// Only accounts with this vendor tag (KTC, KTCG, NHN, NHNG, NCP, NCPG)
        #[arg(long)]
        vendor: Option<String>,

        /// Output format (json, yaml, or pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Join cloud inventory with collected facts by private IP
    Build {
        /// Inventory file written by `cloud inventory` (repeatable)
        #[arg(short, long, required = true)]
        inventory: Vec<PathBuf>,

        /// Facts file for one customer, as CUSTOMER=FILE (repeatable)
        #[arg(long, value_parser = parse_customer_file)]
        facts: Vec<(String, PathBuf)>,

        /// Only keep rows matching this keyword
        #[arg(short, long)]
        search: Option<String>,

        /// Output format (json, yaml, or pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Append the written file name and time to this log
        #[arg(long, requires = "output")]
        log: Option<PathBuf>,
    },
    /// Search a saved report
    Search {
        /// Report file written by `report build`
        #[arg(short, long)]
        report: PathBuf,

        /// Matches private IP, public IP, customer or hostname
        #[arg(short, long)]
        keyword: String,

        /// Output format (json, yaml, or pretty)
        #[arg(short, long, default_value = "pretty")]
        format: String,
    },
}

fn parse_customer_file(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((customer, path)) if !customer.trim().is_empty() && !path.trim().is_empty() => {
            Ok((customer.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected CUSTOMER=FILE, got '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_report_build_args() {
        let cli = Cli::try_parse_from([
            "vm-inventory",
            "report",
            "build",
            "--inventory",
            "cloud.json",
            "--facts",
            "acme=acme-facts.json",
            "--output",
            "report.json",
            "--log",
            "collection.log",
        ])
        .unwrap();

        match cli.command {
            Commands::Report(ReportCommands::Build { inventory, facts, log, .. }) => {
                assert_eq!(inventory, [PathBuf::from("cloud.json")]);
                assert_eq!(facts, [("acme".to_string(), PathBuf::from("acme-facts.json"))]);
                assert_eq!(log, Some(PathBuf::from("collection.log")));
            }
            _ => panic!("parsed into the wrong command"),
        }
    }

    #[test]
    fn test_log_requires_output() {
        let result = Cli::try_parse_from([
            "vm-inventory",
            "report",
            "build",
            "--inventory",
            "cloud.json",
            "--log",
            "collection.log",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_customer_file_parser() {
        assert!(parse_customer_file("acme").is_err());
        assert!(parse_customer_file("=facts.json").is_err());
        assert_eq!(
            parse_customer_file("acme = facts.json").unwrap(),
            ("acme".to_string(), PathBuf::from("facts.json"))
        );
    }
}
