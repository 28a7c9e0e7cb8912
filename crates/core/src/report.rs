//! One derivation pass over a [`TableSet`], producing every dashboard section.
//!
//! Sections never short-circuit each other. Each carries its own diagnostics and
//! degrades to an empty value when its inputs are unusable; tables rejected at load
//! time are listed once on the report.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{DerivationError, Derived};
use crate::insights::{Insight, InsightConfig, InsightEngine, InsightInputs};
use crate::metrics::{ArpuSeries, GrowthSeries, KpiSnapshot, MetricsEngine};
use crate::period::{PeriodRecord, PeriodWindow};
use crate::returns::{
    EntityKind, PeriodReturnPoint, ReturnAggregator, ReturnCategoryTotal, ReturnEntity,
    ReturnEntityRow,
};
use crate::schema::Field;
use crate::segmentation::{
    CategorySummary, CustomerRfm, GuestComparison, ScatterPoint, SegmentationEngine, Totalizer,
    DEFAULT_GUEST_SENTINEL,
};
use crate::table::{TableKind, TableSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub window: PeriodWindow,
    pub guest_sentinel: String,
    pub insights: InsightConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window: PeriodWindow::default(),
            guest_sentinel: DEFAULT_GUEST_SENTINEL.to_string(),
            insights: InsightConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Kpi,
    Growth,
    ReturnTrend,
    Guests,
    CategoryRevenue,
    CategoryCount,
    Scatter,
    ProductReturns,
    CustomerReturns,
    AbnormalProducts,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kpi => "kpi",
            Self::Growth => "growth",
            Self::ReturnTrend => "return_trend",
            Self::Guests => "guests",
            Self::CategoryRevenue => "category_revenue",
            Self::CategoryCount => "category_count",
            Self::Scatter => "scatter",
            Self::ProductReturns => "product_returns",
            Self::CustomerReturns => "customer_returns",
            Self::AbnormalProducts => "abnormal_products",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic attributed to the section it degraded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub section: Section,
    pub error: DerivationError,
}

/// Projected return entities with their per-category totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReturnSection {
    pub entities: Vec<ReturnEntity>,
    pub categories: Vec<ReturnCategoryTotal>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardReport {
    pub kpi: Derived<KpiSnapshot>,
    pub growth: Derived<GrowthSeries>,
    pub return_trend: Derived<Vec<PeriodReturnPoint>>,
    pub guests: Derived<GuestComparison>,
    pub category_revenue: Derived<CategorySummary>,
    pub category_count: Derived<CategorySummary>,
    pub scatter: Derived<Vec<ScatterPoint>>,
    pub product_returns: Derived<ReturnSection>,
    pub customer_returns: Derived<ReturnSection>,
    pub abnormal_products: Derived<ReturnSection>,
    pub insights: Vec<Insight>,
    /// Tables rejected as malformed, one entry each.
    pub rejected_tables: Vec<DerivationError>,
}

impl DashboardReport {
    /// Every section diagnostic, in section order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let sections: [(Section, &[DerivationError]); 10] = [
            (Section::Kpi, &self.kpi.diagnostics),
            (Section::Growth, &self.growth.diagnostics),
            (Section::ReturnTrend, &self.return_trend.diagnostics),
            (Section::Guests, &self.guests.diagnostics),
            (Section::CategoryRevenue, &self.category_revenue.diagnostics),
            (Section::CategoryCount, &self.category_count.diagnostics),
            (Section::Scatter, &self.scatter.diagnostics),
            (Section::ProductReturns, &self.product_returns.diagnostics),
            (Section::CustomerReturns, &self.customer_returns.diagnostics),
            (Section::AbnormalProducts, &self.abnormal_products.diagnostics),
        ];
        sections
            .into_iter()
            .flat_map(|(section, errors)| {
                errors.iter().cloned().map(move |error| Diagnostic { section, error })
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected_tables.is_empty() && self.diagnostics().is_empty()
    }
}

fn with_inputs<T>(value: T, diagnostics: &[DerivationError]) -> Derived<T> {
    Derived::with_diagnostics(value, diagnostics.to_vec())
}

fn collect_return_rows(tables: &TableSet, kind: TableKind) -> Derived<Vec<ReturnEntityRow>> {
    match tables.present(kind) {
        Ok(table) => ReturnEntityRow::collect(table, kind),
        Err(error) => Derived::empty(error),
    }
}

fn project_returns(
    rows: &Derived<Vec<ReturnEntityRow>>,
    kind: TableKind,
) -> Derived<ReturnSection> {
    let aggregator = ReturnAggregator;
    let entities = aggregator.entity_projection(EntityKind::of(kind), &rows.value);
    let categories = aggregator.category_totals(&entities);
    with_inputs(ReturnSection { entities, categories }, &rows.diagnostics)
}

fn collect_returns(tables: &TableSet, kind: TableKind) -> Derived<ReturnSection> {
    project_returns(&collect_return_rows(tables, kind), kind)
}

/// Derives the full dashboard. Pure over its inputs: equal inputs give equal reports.
pub fn derive_report(tables: &TableSet, config: &AnalysisConfig) -> DashboardReport {
    let metrics = MetricsEngine;
    let segmentation = SegmentationEngine::new(config.guest_sentinel.clone());
    let aggregator = ReturnAggregator;

    let periods_table = tables.present(TableKind::Periods).map(|table| config.window.filter(table));
    let periods = match &periods_table {
        Ok(table) => PeriodRecord::collect(table),
        Err(error) => Derived::empty(error.clone()),
    };
    let arpu = match tables.present(TableKind::AovArpu) {
        Ok(table) => ArpuSeries::collect(table),
        Err(_) => Derived::ok(ArpuSeries::default()),
    };
    let mut metric_inputs = periods.diagnostics.clone();
    metric_inputs.extend(arpu.diagnostics.iter().cloned());

    let kpi = with_inputs(metrics.kpi_snapshot(&periods.value, &arpu.value), &metric_inputs);
    let growth = with_inputs(metrics.growth_series(&periods.value, &arpu.value), &metric_inputs);
    let return_trend =
        with_inputs(aggregator.period_return_series(&periods.value), &periods.diagnostics);

    let customers_table = tables.present(TableKind::Customers);
    let customers = match &customers_table {
        Ok(table) => CustomerRfm::collect(table),
        Err(error) => Derived::empty(error.clone()),
    };
    let split = segmentation.split_guests(&customers.value);
    let guests = with_inputs(split.comparison.clone(), &customers.diagnostics);
    let category_revenue = with_inputs(
        segmentation.category_summary(&split.customers, Totalizer::Monetary),
        &customers.diagnostics,
    );
    let category_count = with_inputs(
        segmentation.category_summary(&split.customers, Totalizer::Count),
        &customers.diagnostics,
    );
    let scatter =
        with_inputs(segmentation.scatter_projection(&split.customers), &customers.diagnostics);

    let product_rows = collect_return_rows(tables, TableKind::ProductReturns);
    let product_returns = project_returns(&product_rows, TableKind::ProductReturns);
    let customer_returns = collect_returns(tables, TableKind::CustomerReturns);
    let abnormal_products = collect_returns(tables, TableKind::AbnormalProducts);

    let has_order_counts = periods_table
        .as_ref()
        .is_ok_and(|table| table.has(Field::ReturnOrders) && table.has(Field::NormalOrders));
    let has_categories =
        customers_table.as_ref().is_ok_and(|table| table.has(Field::Category));
    let has_product_amounts = tables
        .present(TableKind::ProductReturns)
        .is_ok_and(|table| table.has(Field::ReturnAmount));
    let insights = InsightEngine::new(config.insights.clone()).evaluate(&InsightInputs {
        return_series: has_order_counts.then_some(return_trend.value.as_slice()),
        customers: has_categories.then_some(split.customers.as_slice()),
        products: has_product_amounts.then_some(product_rows.value.as_slice()),
    });

    let report = DashboardReport {
        kpi,
        growth,
        return_trend,
        guests,
        category_revenue,
        category_count,
        scatter,
        product_returns,
        customer_returns,
        abnormal_products,
        insights,
        rejected_tables: tables.rejected().map(|(_, error)| error.clone()).collect(),
    };
    log_outcome(&report);
    report
}

fn log_outcome(report: &DashboardReport) {
    for error in &report.rejected_tables {
        warn!(
            event_name = "pulseboard.report.table_rejected",
            error = %error,
            "table rejected as malformed"
        );
    }

    let diagnostics = report.diagnostics();
    for diagnostic in &diagnostics {
        warn!(
            event_name = "pulseboard.report.section_degraded",
            section = %diagnostic.section,
            error = %diagnostic.error,
            "report section degraded"
        );
    }

    info!(
        event_name = "pulseboard.report.derived",
        periods = report.growth.value.points().len(),
        insights = report.insights.len(),
        diagnostics = diagnostics.len(),
        "dashboard report derived"
    );
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{derive_report, AnalysisConfig, Section};
    use crate::errors::DerivationError;
    use crate::insights::InsightKind;
    use crate::schema::Field;
    use crate::table::{Table, TableKind, TableSet};

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn periods() -> Table {
        Table::from_rows(
            "mom",
            &["YearMonth", "Revenue", "Normal_Orders", "Customer", "Return_Orders", "Return"],
            &[
                &["2010-12", "800", "8", "4", "0", "0"],
                &["2011-01", "1000", "10", "5", "1", "-50"],
                &["2011-02", "1200", "12", "6", "3", "-90"],
                &["2011-12", "5000", "50", "20", "0", "0"],
            ],
        )
        .expect("periods table")
    }

    fn customers() -> Table {
        Table::from_rows(
            "rfm",
            &["CustomerID", "Recency", "Frequency", "Monetary", "Total_Score", "Category"],
            &[
                &["GUEST", "1", "500", "9000", "15", "Champions"],
                &["12346", "300", "1", "100", "3", "Lost"],
                &["12347", "2", "30", "4000", "15", "Champions"],
                &["12348", "200", "2", "300", "5", "At Risk"],
            ],
        )
        .expect("rfm table")
    }

    #[test]
    fn report_uses_windowed_periods() {
        let tables = TableSet::default()
            .with_table(TableKind::Periods, periods())
            .with_table(TableKind::Customers, customers());

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert_eq!(report.kpi.value.period.as_ref().map(|p| p.as_str()), Some("2011-02"));
        assert_eq!(report.kpi.value.revenue_mom_pct, dec(20));
        assert_eq!(report.growth.value.points().len(), 2);
        assert_eq!(report.guests.value.guest_count, 1);
        assert_eq!(report.category_count.value.rows.len(), 3);
        assert!(report.kpi.is_clean());
    }

    #[test]
    fn missing_tables_degrade_only_their_sections() {
        let tables = TableSet::default().with_table(TableKind::Customers, customers());

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert!(report.kpi.value.is_empty());
        assert_eq!(report.kpi.diagnostics, vec![DerivationError::missing_table(TableKind::Periods)]);
        assert!(report.guests.is_clean());
        assert_eq!(report.scatter.value.len(), 3);
        let sections: Vec<Section> =
            report.diagnostics().into_iter().map(|diagnostic| diagnostic.section).collect();
        assert!(sections.contains(&Section::ProductReturns));
        assert!(!sections.contains(&Section::Scatter));
    }

    #[test]
    fn churn_rule_counts_registered_customers_only() {
        let tables = TableSet::default().with_table(TableKind::Customers, customers());

        let report = derive_report(&tables, &AnalysisConfig::default());

        let churn = report
            .insights
            .iter()
            .find(|insight| insight.kind == InsightKind::ChurnRisk)
            .expect("two of three registered customers are at risk");
        assert!(churn.message.contains("2 customers (66.7%)"));
    }

    #[test]
    fn rejected_tables_are_reported_once() {
        let mut tables = TableSet::default().with_table(TableKind::Customers, customers());
        tables.insert_result(
            TableKind::Periods,
            Table::from_rows("mom", &["YearMonth", "Revenue"], &[&["2011-01"]]),
        );

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert_eq!(report.rejected_tables.len(), 1);
        assert!(report.rejected_tables[0].is_fatal());
        assert!(!report.is_clean());
        assert_eq!(report.guests.value.others_count, 3);
    }

    #[test]
    fn missing_normal_orders_do_not_inflate_the_return_rate() {
        let table = Table::from_rows(
            "mom",
            &["YearMonth", "Revenue", "Customer", "Return_Orders", "Return"],
            &[&["2011-01", "1000", "5", "3", "-30"]],
        )
        .expect("periods table");
        let tables = TableSet::default().with_table(TableKind::Periods, table);

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert_eq!(report.kpi.value.return_rate, Decimal::ZERO);
        assert_eq!(report.return_trend.value[0].return_rate_pct, Decimal::ZERO);
        assert_eq!(report.kpi.diagnostics, vec![DerivationError::missing_column(
            TableKind::Periods,
            Field::NormalOrders
        )]);
    }

    #[test]
    fn unrepresentable_growth_degrades_to_zero() {
        let table = Table::from_rows(
            "mom",
            &["YearMonth", "Revenue", "Normal_Orders", "Customer", "Return_Orders", "Return"],
            &[
                &["2011-01", "0.0000000000000000000000001", "1", "1", "0", "0"],
                &["2011-02", "100000000", "10", "5", "1", "-50"],
            ],
        )
        .expect("periods table");
        let tables = TableSet::default().with_table(TableKind::Periods, table);

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert_eq!(report.kpi.value.revenue_mom_pct, Decimal::ZERO);
        assert_eq!(report.growth.value.points()[1].revenue_growth_pct, Some(Decimal::ZERO));
        assert!(report.growth.value.declining_periods().is_empty());
    }

    fn product_returns(header: &[&str], rows: &[&[&str]]) -> TableSet {
        let table = Table::from_rows("return_product", header, rows).expect("product table");
        TableSet::default().with_table(TableKind::ProductReturns, table)
    }

    #[test]
    fn top_loss_fires_without_a_rate_column() {
        let tables =
            product_returns(&["StockCode", "Return_Amount"], &[&["A", "-500"], &["B", "-300"]]);

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert!(report.product_returns.value.entities.is_empty());
        assert_eq!(report.insights.len(), 1);
        assert_eq!(report.insights[0].kind, InsightKind::TopLossProducts);
        assert!(report.insights[0].message.starts_with("Top loss products: A, B account"));
        assert!(report.insights[0].message.contains("(total $800)"));
    }

    #[test]
    fn top_loss_keeps_rows_with_a_blank_rate() {
        let tables = product_returns(&["StockCode", "Return_Amount", "Return_Rate"], &[
            &["BIG", "-9000", ""],
            &["small", "-10", "5"],
        ]);

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert_eq!(report.product_returns.value.entities.len(), 1);
        let top_loss = &report.insights[0];
        assert!(top_loss.message.starts_with("Top loss products: BIG, small account"));
        assert!(top_loss.message.contains("(total $9,010)"));
    }

    #[test]
    fn top_loss_is_skipped_without_an_amount_column() {
        let tables =
            product_returns(&["StockCode", "Return_Rate"], &[&["A", "50"], &["B", "20"]]);

        let report = derive_report(&tables, &AnalysisConfig::default());

        assert!(report.insights.is_empty());
        assert!(!report.product_returns.is_clean());
    }

    #[test]
    fn repeated_derivation_is_identical() {
        let tables = TableSet::default()
            .with_table(TableKind::Periods, periods())
            .with_table(TableKind::Customers, customers());
        let config = AnalysisConfig::default();

        assert_eq!(derive_report(&tables, &config), derive_report(&tables, &config));
    }
}
