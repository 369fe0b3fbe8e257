//! # Audit Configuration Validator
//!
//! Command-line tool for validating audit configuration files before a run.
//! Loads defaults, the optional TOML file and `AUDIT__*` environment overrides
//! exactly as the orchestrator would, then prints the effective configuration.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use speedaudit_core::config::MAX_WORKERS;
use speedaudit_core::{init_tracing, ConfigManager};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate audit configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to a TOML configuration file (defaults and environment only when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match validate(&cli) {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::load_from_file(cli.config.clone())
        .context("failed to load configuration")?;

    let effective = manager.debug_config();
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }
        OutputFormat::Table => {
            println!("🔧 Audit Configuration");
            match manager.source_path() {
                Some(path) => println!("Source: {}", path.display()),
                None => println!("Source: defaults + environment"),
            }
            println!();

            let mut rows = Vec::new();
            flatten("", &effective, &mut rows);
            let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            for (key, value) in rows {
                println!("  {key:<width$}  {value}");
            }

            println!();
            println!(
                "✅ Configuration valid ({} workers, max {MAX_WORKERS})",
                manager.config().orchestrator.workers
            );
        }
    }

    Ok(())
}

/// Dotted `section.field = value` rows in document order
fn flatten(prefix: &str, value: &serde_json::Value, rows: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, rows);
            }
        }
        serde_json::Value::String(s) => rows.push((prefix.to_string(), s.clone())),
        serde_json::Value::Null => rows.push((prefix.to_string(), "-".to_string())),
        other => rows.push((prefix.to_string(), other.to_string())),
    }
}
