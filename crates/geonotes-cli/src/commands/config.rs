use std::path::Path;

use geonotes_core::config::{ClientConfig, CONFIG_KEYS};

use crate::backend::Context;
use crate::cli::ConfigCommands;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, context: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => run_config_show(&context.config, json),
        ConfigCommands::Set { key, value } => {
            run_config_set(&context.config_path, &key, &value)
        }
        ConfigCommands::Path => {
            println!("{}", context.config_path.display());
            Ok(())
        }
    }
}

fn run_config_show(config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let redacted = redacted(config);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    for line in format_config_lines(&redacted) {
        println!("{line}");
    }
    Ok(())
}

/// Update the file on disk; environment overrides are not persisted
pub fn run_config_set(config_path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let mut config = ClientConfig::load(config_path)?;
    config.set(key, value)?;
    config.save(config_path)?;
    println!("Updated {key} in {}", config_path.display());
    Ok(())
}

pub fn redacted(config: &ClientConfig) -> ClientConfig {
    let mut shown = config.clone();
    if shown.access_token.is_some() {
        shown.access_token = Some("[REDACTED]".to_string());
    }
    shown
}

pub fn format_config_lines(config: &ClientConfig) -> Vec<String> {
    let unset = || "(unset)".to_string();
    CONFIG_KEYS
        .iter()
        .map(|key| {
            let value = match *key {
                "api_base_url" => config.api_base_url.clone().unwrap_or_else(unset),
                "access_token" => config.access_token.clone().unwrap_or_else(unset),
                "db_path" => config.db_path.clone().unwrap_or_else(unset),
                "request_timeout_secs" => config.request_timeout_secs.to_string(),
                "max_attempts" => config.max_attempts.to_string(),
                "conflict_strategy" => config.conflict_strategy.to_string(),
                "sync_interval_secs" => config.sync_interval_secs.to_string(),
                _ => unset(),
            };
            format!("{key:<22}{value}")
        })
        .collect()
}
