use std::path::PathBuf;

use pulseboard_core::{derive_report, Diagnostic, Insight, PeriodKey};
use serde::Serialize;

use crate::commands::{load_sources, to_json, CommandResult};

const COMMAND: &str = "insights";

#[derive(Debug, Serialize)]
struct InsightsPayload<'a> {
    period: Option<&'a PeriodKey>,
    insights: &'a [Insight],
    /// Sections whose degradation may have suppressed a rule.
    diagnostics: Vec<Diagnostic>,
}

pub fn run(json_output: bool, data_dir: Option<PathBuf>) -> CommandResult {
    let (config, load) = match load_sources(COMMAND, data_dir) {
        Ok(loaded) => loaded,
        Err(result) => return result,
    };

    let report = derive_report(&load.tables, &config.analysis());

    if json_output {
        let payload = InsightsPayload {
            period: report.kpi.value.period.as_ref(),
            insights: &report.insights,
            diagnostics: report.diagnostics(),
        };
        return to_json(COMMAND, &payload);
    }

    let mut lines = Vec::new();
    if report.insights.is_empty() {
        lines.push("no insight rules fired".to_string());
    }
    for insight in &report.insights {
        lines.push(format!("- {}", insight.message));
    }
    CommandResult { exit_code: 0, output: lines.join("\n") }
}
