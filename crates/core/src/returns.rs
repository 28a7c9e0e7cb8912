//! Period return trends and projections of externally classified return entities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::Derived;
use crate::metrics::period_return_rate;
use crate::period::{PeriodKey, PeriodRecord};
use crate::schema::Field;
use crate::table::{RowReader, Table, TableKind};

pub const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Customer,
}

impl EntityKind {
    /// Entity kind carried by a return table; abnormal products are products.
    pub fn of(table: TableKind) -> Self {
        match table {
            TableKind::CustomerReturns => Self::Customer,
            _ => Self::Product,
        }
    }
}

/// A return-statistics row as read, before projection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnEntityRow {
    pub entity_key: Option<String>,
    pub return_amount: Option<Decimal>,
    pub return_rate: Option<Decimal>,
    pub return_count: Option<Decimal>,
    pub category: Option<String>,
}

impl ReturnEntityRow {
    pub fn new(entity_key: &str, return_amount: Decimal, return_rate: Decimal) -> Self {
        Self {
            entity_key: Some(entity_key.to_string()),
            return_amount: Some(return_amount),
            return_rate: Some(return_rate),
            return_count: None,
            category: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_count(mut self, count: Decimal) -> Self {
        self.return_count = Some(count);
        self
    }

    /// Magnitude of the return amount; absent when the amount cell is.
    pub fn loss(&self) -> Option<Decimal> {
        self.return_amount.map(|amount| amount.abs())
    }

    pub fn collect(table: &Table, kind: TableKind) -> Derived<Vec<ReturnEntityRow>> {
        let mut reader = RowReader::new(
            table,
            kind,
            &[Field::EntityKey, Field::ReturnAmount, Field::ReturnRate],
        );
        let mut rows = Vec::with_capacity(reader.rows());
        for row in 0..reader.rows() {
            rows.push(ReturnEntityRow {
                entity_key: reader.text(row, Field::EntityKey),
                return_amount: reader.decimal(row, Field::ReturnAmount),
                return_rate: reader.decimal(row, Field::ReturnRate),
                return_count: reader.decimal(row, Field::ReturnCount),
                category: reader.text(row, Field::Category),
            });
        }
        Derived::with_diagnostics(rows, reader.finish())
    }
}

/// A projected return entity, ready for presentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnEntity {
    pub kind: EntityKind,
    pub entity_key: Option<String>,
    /// As exported; may be negative.
    pub return_amount: Decimal,
    pub return_rate: Decimal,
    pub return_count: Option<Decimal>,
    pub category: String,
}

impl ReturnEntity {
    pub fn loss(&self) -> Decimal {
        self.return_amount.abs()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodReturnPoint {
    pub period: PeriodKey,
    pub return_rate_pct: Decimal,
    /// Magnitude of the period's return amount.
    pub return_amount: Option<Decimal>,
}

/// Totals for one external return category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnCategoryTotal {
    pub category: String,
    pub entities: usize,
    pub return_amount: Decimal,
    pub return_count: Decimal,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReturnAggregator;

impl ReturnAggregator {
    pub fn period_return_series(&self, periods: &[PeriodRecord]) -> Vec<PeriodReturnPoint> {
        periods
            .iter()
            .map(|record| PeriodReturnPoint {
                period: record.period.clone(),
                return_rate_pct: period_return_rate(record),
                return_amount: record.return_amount.map(|amount| amount.abs()),
            })
            .collect()
    }

    /// Drops rows lacking an amount or a rate; blank categories become `Unknown`.
    pub fn entity_projection(&self, kind: EntityKind, rows: &[ReturnEntityRow]) -> Vec<ReturnEntity> {
        rows.iter()
            .filter_map(|row| {
                Some(ReturnEntity {
                    kind,
                    entity_key: row.entity_key.clone(),
                    return_amount: row.return_amount?,
                    return_rate: row.return_rate?,
                    return_count: row.return_count,
                    category: row
                        .category
                        .as_deref()
                        .map(str::trim)
                        .filter(|category| !category.is_empty())
                        .unwrap_or(UNKNOWN_CATEGORY)
                        .to_string(),
                })
            })
            .collect()
    }

    /// Per-category totals in order of first appearance.
    pub fn category_totals(&self, entities: &[ReturnEntity]) -> Vec<ReturnCategoryTotal> {
        let mut totals: Vec<ReturnCategoryTotal> = Vec::new();
        for entity in entities {
            let index = match totals.iter().position(|total| total.category == entity.category) {
                Some(index) => index,
                None => {
                    totals.push(ReturnCategoryTotal {
                        category: entity.category.clone(),
                        entities: 0,
                        return_amount: Decimal::ZERO,
                        return_count: Decimal::ZERO,
                    });
                    totals.len() - 1
                }
            };
            let total = &mut totals[index];
            total.entities += 1;
            total.return_amount = total.return_amount.saturating_add(entity.loss());
            total.return_count =
                total.return_count.saturating_add(entity.return_count.unwrap_or_default());
        }
        totals
    }
}
