//! Monthly period keys, the reporting window, and typed period rows.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::errors::Derived;
use crate::schema::Field;
use crate::table::{Cell, RowReader, Table, TableKind};

/// A month key such as `2011-11`.
///
/// `YYYY-MM`, `YYYY/MM` and `YYYYMM` are understood; the raw text is kept for
/// display. Keys that do not parse still order by their raw text, after parsed ones.
#[derive(Clone, Debug)]
pub struct PeriodKey {
    raw: String,
    month: Option<(i32, u32)>,
}

impl PeriodKey {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into().trim().to_string();
        let month = parse_year_month(&raw);
        Self { raw, month }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn year(&self) -> Option<i32> {
        self.month.map(|(year, _)| year)
    }

    pub fn month(&self) -> Option<u32> {
        self.month.map(|(_, month)| month)
    }

    /// `YYYY-MM` when parsed, otherwise the raw text.
    pub fn canonical(&self) -> String {
        match self.month {
            Some((year, month)) => format!("{year:04}-{month:02}"),
            None => self.raw.clone(),
        }
    }

    /// Human label, e.g. `November 2011`.
    pub fn label(&self) -> String {
        self.month
            .and_then(|(year, month)| NaiveDate::from_ymd_opt(year, month, 1))
            .map(|date| date.format("%B %Y").to_string())
            .unwrap_or_else(|| self.raw.clone())
    }
}

fn parse_year_month(raw: &str) -> Option<(i32, u32)> {
    let (year, month) = match raw.split_once(['-', '/']) {
        Some((year, rest)) => {
            let month = rest.split(['-', '/', ' ', 'T']).next().unwrap_or(rest);
            (year, month)
        }
        None if raw.len() == 6 && raw.is_char_boundary(4) => raw.split_at(4),
        None => return None,
    };

    if year.len() != 4 || !year.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if month.is_empty() || month.len() > 2 || !month.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    let year = year.parse::<i32>().ok()?;
    let month = month.parse::<u32>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

impl PartialEq for PeriodKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PeriodKey {}

impl PartialOrd for PeriodKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeriodKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.month, other.month) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.raw.cmp(&other.raw),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// Year-to-date window: rows whose period starts with `year_prefix`, minus an
/// optional trailing month.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodWindow {
    pub year_prefix: String,
    pub exclude_month: Option<u32>,
}

impl Default for PeriodWindow {
    fn default() -> Self {
        Self { year_prefix: "2011".to_string(), exclude_month: Some(12) }
    }
}

impl PeriodWindow {
    pub fn new(year_prefix: impl Into<String>, exclude_month: Option<u32>) -> Self {
        Self { year_prefix: year_prefix.into(), exclude_month }
    }

    pub fn contains(&self, raw: &str) -> bool {
        let raw = raw.trim();
        if !raw.starts_with(self.year_prefix.as_str()) {
            return false;
        }
        match (self.exclude_month, PeriodKey::new(raw).month()) {
            (Some(excluded), Some(month)) => month != excluded,
            _ => true,
        }
    }

    /// Rows of `table` inside the window, in original order.
    ///
    /// A table without a resolved period column is returned unchanged.
    pub fn filter(&self, table: &Table) -> Table {
        let Some(index) = table.column(Field::Period) else {
            return table.clone();
        };
        table.retain_rows(|row| {
            row.get(index).and_then(Cell::to_text).is_some_and(|raw| self.contains(&raw))
        })
    }
}

/// One month of aggregate activity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodRecord {
    pub period: PeriodKey,
    pub revenue: Option<Decimal>,
    pub normal_orders: Option<u64>,
    pub return_orders: Option<u64>,
    pub customers: Option<u64>,
    /// Signed as exported; only the magnitude is meaningful.
    pub return_amount: Option<Decimal>,
}

const PERIOD_FIELDS: [Field; 6] = [
    Field::Period,
    Field::Revenue,
    Field::NormalOrders,
    Field::Customers,
    Field::ReturnOrders,
    Field::ReturnAmount,
];

impl PeriodRecord {
    pub fn new(
        period: &str,
        revenue: Decimal,
        normal_orders: u64,
        customers: u64,
        return_orders: u64,
        return_amount: Decimal,
    ) -> Self {
        Self {
            period: PeriodKey::new(period),
            revenue: Some(revenue),
            normal_orders: Some(normal_orders),
            return_orders: Some(return_orders),
            customers: Some(customers),
            return_amount: Some(return_amount),
        }
    }

    /// Reads the monthly table into records ordered by period.
    ///
    /// Rows without a period are skipped. A period seen twice keeps its last
    /// row, which models a restated month.
    pub fn collect(table: &Table) -> Derived<Vec<PeriodRecord>> {
        let mut reader = RowReader::new(table, TableKind::Periods, &PERIOD_FIELDS);
        if !table.has(Field::Period) {
            return Derived::with_diagnostics(Vec::new(), reader.finish());
        }

        let mut records = Vec::with_capacity(reader.rows());
        for row in 0..reader.rows() {
            let Some(period) = reader.text(row, Field::Period) else {
                continue;
            };
            records.push(PeriodRecord {
                period: PeriodKey::new(period),
                revenue: reader.decimal(row, Field::Revenue),
                normal_orders: reader.count(row, Field::NormalOrders),
                return_orders: reader.count(row, Field::ReturnOrders),
                customers: reader.count(row, Field::Customers),
                return_amount: reader.decimal(row, Field::ReturnAmount),
            });
        }

        Derived::with_diagnostics(order_and_dedup(records), reader.finish())
    }
}

fn order_and_dedup(mut records: Vec<PeriodRecord>) -> Vec<PeriodRecord> {
    records.sort_by(|left, right| left.period.cmp(&right.period));
    let mut ordered: Vec<PeriodRecord> = Vec::with_capacity(records.len());
    for record in records {
        match ordered.last_mut() {
            Some(last) if last.period == record.period => *last = record,
            _ => ordered.push(record),
        }
    }
    ordered
}
