//! Period KPIs and month-over-month growth.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::Derived;
use crate::period::{PeriodKey, PeriodRecord};
use crate::schema::Field;
use crate::table::{RowReader, Table, TableKind};

/// `numerator / denominator`, or zero when the denominator is not positive or
/// the quotient overflows.
pub fn ratio_or_zero(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator > Decimal::ZERO {
        numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}

/// Share of orders that were returns, in percent. Zero when there were no orders.
pub fn return_rate_pct(return_orders: u64, normal_orders: u64) -> Decimal {
    let total = Decimal::from(return_orders) + Decimal::from(normal_orders);
    ratio_or_zero(Decimal::from(return_orders), total) * Decimal::ONE_HUNDRED
}

/// Return rate of one period row; zero unless both order counts were read.
pub fn period_return_rate(record: &PeriodRecord) -> Decimal {
    match (record.return_orders, record.normal_orders) {
        (Some(return_orders), Some(normal_orders)) => {
            return_rate_pct(return_orders, normal_orders)
        }
        _ => Decimal::ZERO,
    }
}

/// Percent change from `previous` to `current`; zero unless `previous` is positive.
/// A change too large to represent is also zero.
pub fn growth_pct(current: Decimal, previous: Decimal) -> Decimal {
    if previous <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    current
        .checked_sub(previous)
        .and_then(|delta| delta.checked_div(previous))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

fn aov(record: &PeriodRecord) -> Decimal {
    ratio_or_zero(
        record.revenue.unwrap_or_default(),
        Decimal::from(record.normal_orders.unwrap_or_default()),
    )
}

fn computed_arpu(record: &PeriodRecord) -> Decimal {
    ratio_or_zero(
        record.revenue.unwrap_or_default(),
        Decimal::from(record.customers.unwrap_or_default()),
    )
}

/// One row of the AOV/ARPU table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArpuPoint {
    pub period: PeriodKey,
    pub aov: Option<Decimal>,
    pub arpu: Option<Decimal>,
}

/// Published AOV/ARPU values keyed by period.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ArpuSeries {
    points: Vec<ArpuPoint>,
}

impl ArpuSeries {
    pub fn new(points: Vec<ArpuPoint>) -> Self {
        Self { points }
    }

    pub fn collect(table: &Table) -> Derived<ArpuSeries> {
        let mut reader = RowReader::new(table, TableKind::AovArpu, &[Field::Period, Field::Arpu]);
        let mut points = Vec::new();
        for row in 0..reader.rows() {
            let Some(period) = reader.text(row, Field::Period) else {
                continue;
            };
            points.push(ArpuPoint {
                period: PeriodKey::new(period),
                aov: reader.decimal(row, Field::Aov),
                arpu: reader.decimal(row, Field::Arpu),
            });
        }
        Derived::with_diagnostics(Self { points }, reader.finish())
    }

    pub fn points(&self) -> &[ArpuPoint] {
        &self.points
    }

    /// First point for `period`, compared on the canonical month.
    pub fn lookup(&self, period: &PeriodKey) -> Option<&ArpuPoint> {
        self.points.iter().find(|point| point.period == *period)
    }

    fn arpu_for(&self, period: &PeriodKey) -> Option<Decimal> {
        self.lookup(period).and_then(|point| point.arpu)
    }

    fn aov_for(&self, period: &PeriodKey) -> Option<Decimal> {
        self.lookup(period).and_then(|point| point.aov)
    }
}

/// Headline figures for the latest period of the window.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub period: Option<PeriodKey>,
    pub label: Option<String>,
    pub revenue: Option<Decimal>,
    pub orders: Option<u64>,
    pub customers: Option<u64>,
    pub return_orders: Option<u64>,
    /// Magnitude of the period's return amount.
    pub return_amount: Option<Decimal>,
    pub return_rate: Decimal,
    pub aov: Decimal,
    pub arpu: Decimal,
    pub revenue_mom_pct: Decimal,
}

impl KpiSnapshot {
    pub fn is_empty(&self) -> bool {
        self.period.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GrowthPoint {
    pub period: PeriodKey,
    pub revenue: Option<Decimal>,
    pub orders: Option<u64>,
    pub customers: Option<u64>,
    pub aov: Decimal,
    pub arpu: Decimal,
    /// Absent for the first period of the window.
    pub revenue_growth_pct: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GrowthSeries {
    points: Vec<GrowthPoint>,
}

impl GrowthSeries {
    pub fn points(&self) -> &[GrowthPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Periods whose revenue shrank against the prior period.
    pub fn declining_periods(&self) -> Vec<&PeriodKey> {
        self.points
            .iter()
            .filter(|point| point.revenue_growth_pct.is_some_and(|pct| pct < Decimal::ZERO))
            .map(|point| &point.period)
            .collect()
    }
}

/// Stateless KPI and growth calculator over an ordered period sequence.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsEngine;

impl MetricsEngine {
    /// Snapshot of the last period. An empty sequence yields the all-zero snapshot.
    pub fn kpi_snapshot(&self, periods: &[PeriodRecord], arpu: &ArpuSeries) -> KpiSnapshot {
        let Some((last, earlier)) = periods.split_last() else {
            return KpiSnapshot::default();
        };

        let revenue = last.revenue.unwrap_or_default();
        let revenue_mom_pct = earlier
            .last()
            .map(|previous| growth_pct(revenue, previous.revenue.unwrap_or_default()))
            .unwrap_or_default();

        KpiSnapshot {
            period: Some(last.period.clone()),
            label: Some(last.period.label()),
            revenue: last.revenue,
            orders: last.normal_orders,
            customers: last.customers,
            return_orders: last.return_orders,
            return_amount: last.return_amount.map(|amount| amount.abs()),
            return_rate: period_return_rate(last),
            aov: aov(last),
            arpu: arpu.arpu_for(&last.period).unwrap_or_else(|| computed_arpu(last)),
            revenue_mom_pct,
        }
    }

    /// Per-period trend rows. Published AOV/ARPU values win over computed ones.
    pub fn growth_series(&self, periods: &[PeriodRecord], arpu: &ArpuSeries) -> GrowthSeries {
        let points = periods
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let revenue_growth_pct = index.checked_sub(1).map(|previous| {
                    growth_pct(
                        record.revenue.unwrap_or_default(),
                        periods[previous].revenue.unwrap_or_default(),
                    )
                });
                GrowthPoint {
                    period: record.period.clone(),
                    revenue: record.revenue,
                    orders: record.normal_orders,
                    customers: record.customers,
                    aov: arpu.aov_for(&record.period).unwrap_or_else(|| aov(record)),
                    arpu: arpu.arpu_for(&record.period).unwrap_or_else(|| computed_arpu(record)),
                    revenue_growth_pct,
                }
            })
            .collect();

        GrowthSeries { points }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        growth_pct, period_return_rate, ratio_or_zero, return_rate_pct, ArpuPoint, ArpuSeries,
        MetricsEngine,
    };
    use crate::period::{PeriodKey, PeriodRecord};

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn two_months() -> Vec<PeriodRecord> {
        vec![
            PeriodRecord::new("2011-01", dec(1000), 10, 5, 1, dec(-50)),
            PeriodRecord::new("2011-02", dec(1200), 12, 6, 3, dec(-90)),
        ]
    }

    #[test]
    fn snapshot_uses_last_period_and_prior_month() {
        let snapshot = MetricsEngine.kpi_snapshot(&two_months(), &ArpuSeries::default());

        assert_eq!(snapshot.period.as_ref().map(PeriodKey::as_str), Some("2011-02"));
        assert_eq!(snapshot.label.as_deref(), Some("February 2011"));
        assert_eq!(snapshot.aov, dec(100));
        assert_eq!(snapshot.return_rate, dec(20));
        assert_eq!(snapshot.revenue_mom_pct, dec(20));
        assert_eq!(snapshot.return_amount, Some(dec(90)));
        assert_eq!(snapshot.arpu, dec(200));
    }

    #[test]
    fn snapshot_of_empty_sequence_is_all_zero() {
        let snapshot = MetricsEngine.kpi_snapshot(&[], &ArpuSeries::default());

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.return_rate, Decimal::ZERO);
        assert_eq!(snapshot.aov, Decimal::ZERO);
        assert_eq!(snapshot.revenue_mom_pct, Decimal::ZERO);
    }

    #[test]
    fn single_period_has_no_growth() {
        let periods = vec![PeriodRecord::new("2011-05", dec(500), 0, 0, 0, dec(0))];

        let snapshot = MetricsEngine.kpi_snapshot(&periods, &ArpuSeries::default());

        assert_eq!(snapshot.revenue_mom_pct, Decimal::ZERO);
        assert_eq!(snapshot.aov, Decimal::ZERO);
        assert_eq!(snapshot.arpu, Decimal::ZERO);
        assert_eq!(snapshot.return_rate, Decimal::ZERO);
    }

    #[test]
    fn published_arpu_wins_when_period_matches() {
        let arpu = ArpuSeries::new(vec![ArpuPoint {
            period: PeriodKey::new("2011/02"),
            aov: None,
            arpu: Some(Decimal::new(18_550, 2)),
        }]);

        let snapshot = MetricsEngine.kpi_snapshot(&two_months(), &arpu);

        assert_eq!(snapshot.arpu, Decimal::new(18_550, 2));
    }

    #[test]
    fn zero_previous_revenue_gives_zero_growth() {
        assert_eq!(growth_pct(dec(300), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(growth_pct(dec(300), dec(-10)), Decimal::ZERO);
        assert_eq!(growth_pct(dec(90), dec(100)), dec(-10));
    }

    #[test]
    fn return_rate_guards_zero_orders() {
        assert_eq!(return_rate_pct(0, 0), Decimal::ZERO);
        assert_eq!(return_rate_pct(5, 0), dec(100));
        assert_eq!(return_rate_pct(1, 3), dec(25));
    }

    #[test]
    fn missing_order_count_gives_zero_rate() {
        let record = PeriodRecord {
            normal_orders: None,
            ..PeriodRecord::new("2011-04", dec(1000), 0, 40, 3, dec(-30))
        };

        assert_eq!(period_return_rate(&record), Decimal::ZERO);
        let snapshot = MetricsEngine.kpi_snapshot(&[record], &ArpuSeries::default());
        assert_eq!(snapshot.return_rate, Decimal::ZERO);
        assert_eq!(snapshot.return_orders, Some(3));
    }

    #[test]
    fn unrepresentable_growth_resolves_to_zero() {
        let tiny = Decimal::new(1, 25);

        assert_eq!(growth_pct(dec(100_000_000), tiny), Decimal::ZERO);
        assert_eq!(ratio_or_zero(Decimal::MAX, tiny), Decimal::ZERO);
        assert_eq!(ratio_or_zero(dec(3), dec(4)), Decimal::new(75, 2));
    }

    #[test]
    fn growth_series_omits_first_growth_and_flags_declines() {
        let mut periods = two_months();
        periods.push(PeriodRecord::new("2011-03", dec(900), 9, 4, 0, dec(0)));

        let series = MetricsEngine.growth_series(&periods, &ArpuSeries::default());
        let growth: Vec<Option<Decimal>> =
            series.points().iter().map(|point| point.revenue_growth_pct).collect();

        assert_eq!(growth, vec![None, Some(dec(20)), Some(dec(-25))]);
        assert_eq!(
            series.declining_periods().into_iter().map(PeriodKey::as_str).collect::<Vec<_>>(),
            vec!["2011-03"]
        );
        assert_eq!(series.points()[2].aov, dec(100));
    }
}
