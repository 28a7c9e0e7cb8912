pub mod config;
pub mod doctor;
pub mod insights;
pub mod report;

use std::path::PathBuf;

use pulseboard_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use pulseboard_core::{CatalogLoad, CsvCatalog};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn rendered(output: String) -> Self {
        Self { exit_code: 0, output }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config and every source table for a derivation command.
///
/// Config failures exit with 2. A catalog where no table could be found at all
/// exits with 1; anything short of that still derives a (possibly degraded) report.
fn load_sources(
    command: &str,
    data_dir: Option<PathBuf>,
) -> Result<(AppConfig, CatalogLoad), CommandResult> {
    let options = LoadOptions {
        overrides: ConfigOverrides { sources_base_dir: data_dir, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = AppConfig::load(options)
        .map_err(|error| CommandResult::failure(command, "config_validation", error.to_string(), 2))?;

    let load = CsvCatalog::new(config.sources.clone(), config.schema.clone()).load();
    let nothing_found = load.tables.kinds().next().is_none() && load.errors.is_empty();
    if nothing_found {
        return Err(CommandResult::failure(
            command,
            "sources_unavailable",
            format!("no source tables found under `{}`", config.sources.base_dir.display()),
            1,
        ));
    }

    Ok((config, load))
}

fn to_json<T: Serialize>(command: &str, value: &T) -> CommandResult {
    match serde_json::to_string_pretty(value) {
        Ok(output) => CommandResult::rendered(output),
        Err(error) => CommandResult::failure(command, "serialization", error.to_string(), 1),
    }
}
