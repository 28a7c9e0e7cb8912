use pulseboard_core::config::{AppConfig, LoadOptions};
use pulseboard_core::{CsvCatalog, SourceResolution, TableKind};
use serde::Serialize;

use crate::commands::CommandResult;

/// Tables without which the headline sections cannot be derived.
const CORE_TABLES: [TableKind; 2] = [TableKind::Periods, TableKind::Customers];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name: name.into(), status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_sources(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for kind in TableKind::ALL {
                checks.push(DoctorCheck::new(
                    format!("source.{kind}"),
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// One check per table: found and parsed, missing, or unreadable.
fn check_sources(config: &AppConfig) -> Vec<DoctorCheck> {
    let load = CsvCatalog::new(config.sources.clone(), config.schema.clone()).load();

    load.resolutions
        .iter()
        .map(|(kind, resolution)| {
            let name = format!("source.{kind}");
            match resolution {
                SourceResolution::Present(path) => {
                    match load.errors.iter().find(|error| error.path() == path.as_path()) {
                        Some(error) => DoctorCheck::new(name, CheckStatus::Fail, error.to_string()),
                        None => {
                            let rows = load
                                .tables
                                .get(*kind)
                                .map(|table| table.row_count())
                                .unwrap_or_default();
                            DoctorCheck::new(
                                name,
                                CheckStatus::Pass,
                                format!("`{}` ({rows} rows)", path.display()),
                            )
                        }
                    }
                }
                SourceResolution::Absent { tried } => {
                    let details = format!("not found (tried {} candidates)", tried.len());
                    let status = if CORE_TABLES.contains(kind) {
                        CheckStatus::Fail
                    } else {
                        CheckStatus::Skipped
                    };
                    DoctorCheck::new(name, status, details)
                }
            }
        })
        .collect()
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
