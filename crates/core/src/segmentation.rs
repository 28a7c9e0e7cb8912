//! RFM customer segmentation: guest split, category shares, and the score scatter.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::Derived;
use crate::schema::Field;
use crate::table::{RowReader, Table, TableKind};

pub const DEFAULT_GUEST_SENTINEL: &str = "GUEST";

/// Canonical RFM segments, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RfmCategory {
    Champions,
    Loyal,
    PotentialLoyalist,
    AtRisk,
    Lost,
    Unknown,
}

impl RfmCategory {
    pub const ORDERED: [RfmCategory; 6] = [
        RfmCategory::Champions,
        RfmCategory::Loyal,
        RfmCategory::PotentialLoyalist,
        RfmCategory::AtRisk,
        RfmCategory::Lost,
        RfmCategory::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Champions => "Champions",
            Self::Loyal => "Loyal",
            Self::PotentialLoyalist => "Potential Loyalist",
            Self::AtRisk => "At Risk",
            Self::Lost => "Lost",
            Self::Unknown => "Unknown",
        }
    }

    /// Any label outside the canonical set normalizes to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ORDERED
            .into_iter()
            .find(|category| category.label().eq_ignore_ascii_case(label))
            .unwrap_or(Self::Unknown)
    }
}

/// One customer's RFM row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomerRfm {
    pub customer_id: Option<String>,
    pub recency: Option<Decimal>,
    pub frequency: Option<Decimal>,
    pub monetary: Option<Decimal>,
    pub total_score: Option<Decimal>,
    /// Label as supplied; blank cells read as `Unknown`.
    pub category: String,
}

impl CustomerRfm {
    pub fn new(customer_id: &str, monetary: Decimal, category: &str) -> Self {
        Self {
            customer_id: Some(customer_id.to_string()),
            recency: None,
            frequency: None,
            monetary: Some(monetary),
            total_score: None,
            category: category.to_string(),
        }
    }

    pub fn segment(&self) -> RfmCategory {
        RfmCategory::from_label(&self.category)
    }

    pub fn collect(table: &Table) -> Derived<Vec<CustomerRfm>> {
        let mut reader = RowReader::new(
            table,
            TableKind::Customers,
            &[Field::CustomerId, Field::Monetary, Field::TotalScore, Field::Category],
        );
        let mut customers = Vec::with_capacity(reader.rows());
        for row in 0..reader.rows() {
            customers.push(CustomerRfm {
                customer_id: reader.text(row, Field::CustomerId),
                recency: reader.decimal(row, Field::Recency),
                frequency: reader.decimal(row, Field::Frequency),
                monetary: reader.decimal(row, Field::Monetary),
                total_score: reader.decimal(row, Field::TotalScore),
                category: reader
                    .text(row, Field::Category)
                    .unwrap_or_else(|| RfmCategory::Unknown.label().to_string()),
            });
        }
        Derived::with_diagnostics(customers, reader.finish())
    }
}

/// Guest versus registered totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GuestComparison {
    pub guest_count: usize,
    pub guest_monetary: Decimal,
    pub others_count: usize,
    pub others_monetary: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuestSplit {
    pub comparison: GuestComparison,
    /// Registered customers in input order.
    pub customers: Vec<CustomerRfm>,
}

impl GuestSplit {
    pub fn guest_count(&self) -> usize {
        self.comparison.guest_count
    }

    pub fn guest_monetary(&self) -> Decimal {
        self.comparison.guest_monetary
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Totalizer {
    Monetary,
    Count,
}

/// One category's share of the included customers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    #[serde(skip)]
    pub segment: RfmCategory,
    pub revenue: Decimal,
    pub count: usize,
    pub revenue_pct: Decimal,
    pub count_pct: Decimal,
}

impl CategoryShare {
    pub fn value(&self, totalizer: Totalizer) -> Decimal {
        match totalizer {
            Totalizer::Monetary => self.revenue,
            Totalizer::Count => Decimal::from(self.count),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategorySummary {
    pub totalizer: Totalizer,
    pub rows: Vec<CategoryShare>,
}

impl CategorySummary {
    pub fn empty(totalizer: Totalizer) -> Self {
        Self { totalizer, rows: Vec::new() }
    }

    pub fn total(&self) -> Decimal {
        self.rows
            .iter()
            .fold(Decimal::ZERO, |total, row| total.saturating_add(row.value(self.totalizer)))
    }

    pub fn get(&self, category: &str) -> Option<&CategoryShare> {
        self.rows.iter().find(|row| row.category == category)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub customer_id: Option<String>,
    pub total_score: Decimal,
    pub monetary: Decimal,
    pub category: String,
    pub frequency: Option<Decimal>,
    pub recency: Option<Decimal>,
}

#[derive(Clone, Debug)]
pub struct SegmentationEngine {
    guest_sentinel: String,
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_GUEST_SENTINEL)
    }
}

impl SegmentationEngine {
    pub fn new(guest_sentinel: impl Into<String>) -> Self {
        Self { guest_sentinel: guest_sentinel.into() }
    }

    /// Trimmed, case-insensitive equality with the sentinel.
    pub fn is_guest(&self, customer_id: Option<&str>) -> bool {
        customer_id.is_some_and(|id| id.trim().eq_ignore_ascii_case(self.guest_sentinel.trim()))
    }

    pub fn split_guests(&self, customers: &[CustomerRfm]) -> GuestSplit {
        let mut split = GuestSplit::default();
        for customer in customers {
            let monetary = customer.monetary.unwrap_or_default();
            let comparison = &mut split.comparison;
            if self.is_guest(customer.customer_id.as_deref()) {
                comparison.guest_count += 1;
                comparison.guest_monetary = comparison.guest_monetary.saturating_add(monetary);
            } else {
                comparison.others_count += 1;
                comparison.others_monetary = comparison.others_monetary.saturating_add(monetary);
                split.customers.push(customer.clone());
            }
        }
        split
    }

    /// Revenue and headcount per category in canonical order.
    ///
    /// Categories missing from the input are omitted. Labels outside the canonical
    /// set keep their text and sort after it, in order of first appearance.
    pub fn category_summary(
        &self,
        customers: &[CustomerRfm],
        totalizer: Totalizer,
    ) -> CategorySummary {
        let mut groups: Vec<(String, RfmCategory, Decimal, usize)> = Vec::new();
        for customer in customers {
            let label = customer.category.trim();
            match groups.iter_mut().find(|(existing, ..)| existing == label) {
                Some((_, _, revenue, count)) => {
                    *revenue = revenue.saturating_add(customer.monetary.unwrap_or_default());
                    *count += 1;
                }
                None => groups.push((
                    label.to_string(),
                    customer.segment(),
                    customer.monetary.unwrap_or_default(),
                    1,
                )),
            }
        }
        groups.sort_by_key(|(_, segment, ..)| *segment);

        let revenue_pcts =
            allocate_percentages(&groups.iter().map(|(_, _, revenue, _)| *revenue).collect::<Vec<_>>());
        let count_pcts = allocate_percentages(
            &groups.iter().map(|(.., count)| Decimal::from(*count)).collect::<Vec<_>>(),
        );

        let rows = groups
            .into_iter()
            .zip(revenue_pcts.into_iter().zip(count_pcts))
            .map(|((category, segment, revenue, count), (revenue_pct, count_pct))| {
                CategoryShare { category, segment, revenue, count, revenue_pct, count_pct }
            })
            .collect();

        CategorySummary { totalizer, rows }
    }

    /// Score-versus-revenue points for registered customers with numeric score and monetary.
    pub fn scatter_projection(&self, customers: &[CustomerRfm]) -> Vec<ScatterPoint> {
        customers
            .iter()
            .filter(|customer| !self.is_guest(customer.customer_id.as_deref()))
            .filter_map(|customer| {
                Some(ScatterPoint {
                    customer_id: customer.customer_id.clone(),
                    total_score: customer.total_score?,
                    monetary: customer.monetary?,
                    category: customer.category.clone(),
                    frequency: customer.frequency,
                    recency: customer.recency,
                })
            })
            .collect()
    }
}

/// Splits 100% across `values` in hundredths using the largest-remainder method,
/// so the two-decimal shares always add up to exactly 100.00.
///
/// A non-positive total gives every row 0, as does a total or share too large
/// to represent.
pub fn allocate_percentages(values: &[Decimal]) -> Vec<Decimal> {
    const UNITS: i64 = 10_000;

    let zeros = || vec![Decimal::ZERO; values.len()];
    let total = values.iter().try_fold(Decimal::ZERO, |total, value| total.checked_add(*value));
    let Some(total) = total.filter(|total| *total > Decimal::ZERO) else {
        return zeros();
    };

    let scaled: Option<Vec<Decimal>> = values
        .iter()
        .map(|value| value.checked_div(total)?.checked_mul(Decimal::from(UNITS)))
        .collect();
    let Some(scaled) = scaled else {
        return zeros();
    };
    let mut units: Vec<i64> =
        scaled.iter().map(|share| share.floor().to_i64().unwrap_or_default()).collect();

    let assigned: i64 = units.iter().sum();
    let remaining = usize::try_from(UNITS - assigned).unwrap_or_default().min(values.len());

    let mut by_remainder: Vec<usize> = (0..values.len()).collect();
    by_remainder.sort_by(|left, right| {
        let left_rem = scaled[*left] - scaled[*left].floor();
        let right_rem = scaled[*right] - scaled[*right].floor();
        right_rem.cmp(&left_rem)
    });
    for index in by_remainder.into_iter().take(remaining) {
        units[index] += 1;
    }

    units.into_iter().map(|unit| Decimal::new(unit, 2)).collect()
}
