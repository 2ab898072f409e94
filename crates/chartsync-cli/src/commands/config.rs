//! Config commands - show and validate the configuration file

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use chartsync_core::config::Config;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Check the configuration file for errors
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(format, config_path),
            ConfigCommand::Validate => execute_validate(format, config_path),
        }
    }
}

fn execute_show(format: OutputFormat, config_path: &Path) -> Result<()> {
    let formatter = get_formatter(format.is_json());
    let config = Config::load_or_default(config_path);

    info!(path = %config_path.display(), "Showing configuration");

    if format.is_json() {
        let value = serde_json::to_value(&config)
            .context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&value);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", config_path.display()));
    formatter.info("");
    let yaml =
        serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_validate(format: OutputFormat, config_path: &Path) -> Result<()> {
    let formatter = get_formatter(format.is_json());

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            if !config_path.exists() {
                if format.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": true,
                        "config_path": config_path.display().to_string(),
                        "errors": [],
                        "note": "Configuration file not found; defaults apply.",
                    }));
                } else {
                    formatter.info(&format!(
                        "Configuration file not found at {}",
                        config_path.display()
                    ));
                    formatter.info("The built-in defaults apply.");
                }
                return Ok(());
            }
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [format!("Failed to parse configuration: {e}")],
                }));
            } else {
                formatter.error(&format!("Failed to parse configuration: {e}"));
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Ok(());
        }
    };

    info!(path = %config_path.display(), "Validating configuration");

    let errors = config.validate();

    if format.is_json() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": messages,
        }));
        return Ok(());
    }

    if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }
    Ok(())
}
