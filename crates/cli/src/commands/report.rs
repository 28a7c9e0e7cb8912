use std::path::PathBuf;

use pulseboard_core::insights::format_currency;
use pulseboard_core::{derive_report, DashboardReport, ReturnSection};
use rust_decimal::Decimal;
use tracing::info;

use crate::commands::{load_sources, to_json, CommandResult};

const COMMAND: &str = "report";
const TOP_ENTITIES: usize = 5;

pub fn run(json_output: bool, data_dir: Option<PathBuf>) -> CommandResult {
    let (config, load) = match load_sources(COMMAND, data_dir) {
        Ok(loaded) => loaded,
        Err(result) => return result,
    };

    let report = derive_report(&load.tables, &config.analysis());
    info!(
        event_name = "pulseboard.cli.report",
        clean = report.is_clean(),
        insights = report.insights.len(),
        "report command finished"
    );

    if json_output {
        return to_json(COMMAND, &report);
    }
    CommandResult { exit_code: 0, output: render_human(&report) }
}

fn amount(value: Option<Decimal>) -> String {
    value.map(|value| value.round_dp(2).to_string()).unwrap_or_else(|| "-".to_string())
}

fn count(value: Option<u64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_else(|| "-".to_string())
}

fn pct(value: Decimal) -> String {
    format!("{}%", value.round_dp(2))
}

pub(crate) fn render_human(report: &DashboardReport) -> String {
    let mut lines = Vec::new();

    let kpi = &report.kpi.value;
    match (&kpi.period, &kpi.label) {
        (Some(period), Some(label)) => lines.push(format!("dashboard for {label} ({period})")),
        _ => lines.push("dashboard: no periods in the analysis window".to_string()),
    }

    lines.push("kpi:".to_string());
    lines.push(format!("- revenue = {} ({} vs prior month)", amount(kpi.revenue), pct(kpi.revenue_mom_pct)));
    lines.push(format!("- orders = {}", count(kpi.orders)));
    lines.push(format!("- customers = {}", count(kpi.customers)));
    lines.push(format!("- aov = {}", kpi.aov.round_dp(2)));
    lines.push(format!("- arpu = {}", kpi.arpu.round_dp(2)));
    lines.push(format!(
        "- returns = {} orders, {} ({})",
        count(kpi.return_orders),
        amount(kpi.return_amount),
        pct(kpi.return_rate)
    ));

    lines.push("growth:".to_string());
    for point in report.growth.value.points() {
        let growth = point.revenue_growth_pct.map(pct).unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "- {} revenue {} growth {} aov {} arpu {}",
            point.period,
            amount(point.revenue),
            growth,
            point.aov.round_dp(2),
            point.arpu.round_dp(2)
        ));
    }
    let declining = report.growth.value.declining_periods();
    if !declining.is_empty() {
        let periods: Vec<&str> = declining.into_iter().map(|period| period.as_str()).collect();
        lines.push(format!("- declining months: {}", periods.join(", ")));
    }

    lines.push("return trend:".to_string());
    for point in &report.return_trend.value {
        lines.push(format!(
            "- {} rate {} amount {}",
            point.period,
            pct(point.return_rate_pct),
            amount(point.return_amount)
        ));
    }

    let guests = &report.guests.value;
    lines.push("guests:".to_string());
    lines.push(format!(
        "- guest rows = {} ({})",
        guests.guest_count,
        format_currency(guests.guest_monetary)
    ));
    lines.push(format!(
        "- registered customers = {} ({})",
        guests.others_count,
        format_currency(guests.others_monetary)
    ));

    lines.push("segments:".to_string());
    let counts = &report.category_count.value;
    for share in &report.category_revenue.value.rows {
        let counted = counts.get(&share.category);
        let customers = counted.map(|row| row.count).unwrap_or_default();
        let count_pct = counted.map(|row| row.count_pct).unwrap_or_default();
        lines.push(format!(
            "- {}: revenue {} ({}), customers {} ({})",
            share.category,
            format_currency(share.revenue),
            pct(share.revenue_pct),
            customers,
            pct(count_pct)
        ));
    }

    render_returns(&mut lines, "product returns", &report.product_returns.value);
    render_returns(&mut lines, "customer returns", &report.customer_returns.value);
    render_returns(&mut lines, "abnormal products", &report.abnormal_products.value);

    lines.push("insights:".to_string());
    if report.insights.is_empty() {
        lines.push("- none fired".to_string());
    }
    for insight in &report.insights {
        lines.push(format!("- {}", insight.message));
    }

    let diagnostics = report.diagnostics();
    if !diagnostics.is_empty() || !report.rejected_tables.is_empty() {
        lines.push("diagnostics:".to_string());
        for error in &report.rejected_tables {
            lines.push(format!("- [rejected] {error}"));
        }
        for diagnostic in diagnostics {
            lines.push(format!("- [{}] {}", diagnostic.section, diagnostic.error));
        }
    }

    lines.join("\n")
}

fn render_returns(lines: &mut Vec<String>, title: &str, section: &ReturnSection) {
    lines.push(format!("{title}:"));
    for total in &section.categories {
        lines.push(format!(
            "- {}: {} entities, {} lost",
            total.category,
            total.entities,
            format_currency(total.return_amount)
        ));
    }

    let mut ranked: Vec<_> = section.entities.iter().collect();
    ranked.sort_by(|left, right| right.loss().cmp(&left.loss()));
    for entity in ranked.into_iter().take(TOP_ENTITIES) {
        lines.push(format!(
            "  * {} {} ({} rate)",
            entity.entity_key.as_deref().unwrap_or("(unnamed)"),
            format_currency(entity.loss()),
            pct(entity.return_rate)
        ));
    }
}
