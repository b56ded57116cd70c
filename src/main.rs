mod cli;
mod commands;
mod config;
mod error;
mod facts;
mod inventory;
mod output;
mod providers;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{handle_cloud_command, handle_facts_command, handle_report_command};
use config::AppConfig;
use output::print_error;
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr so stdout stays clean for json/yaml output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vm_inventory=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Facts(cmd) => handle_facts_command(cmd, &config),
        Commands::Cloud(cmd) => handle_cloud_command(cmd, &config),
        Commands::Report(cmd) => handle_report_command(cmd),
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
