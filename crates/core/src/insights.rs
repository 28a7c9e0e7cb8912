//! Threshold rules that turn derived sections into short actionable statements.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::metrics::ratio_or_zero;
use crate::returns::{PeriodReturnPoint, ReturnEntityRow};
use crate::segmentation::{CustomerRfm, RfmCategory};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightConfig {
    /// A period spikes when its return rate exceeds the window mean times this.
    pub return_spike_multiplier: Decimal,
    /// Share of registered customers in At Risk or Lost that triggers the churn rule.
    pub churn_share_threshold: Decimal,
    pub top_loss_products: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            return_spike_multiplier: Decimal::new(15, 1),
            churn_share_threshold: Decimal::new(3, 1),
            top_loss_products: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    ReturnSpike,
    ChurnRisk,
    TopLossProducts,
}

impl InsightKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::ReturnSpike => "Return spike",
            Self::ChurnRisk => "Churn risk",
            Self::TopLossProducts => "Top loss products",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
}

impl Insight {
    fn new(kind: InsightKind, message: String) -> Self {
        Self { kind, message }
    }
}

/// Inputs for one evaluation. `None` skips the dependent rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct InsightInputs<'a> {
    pub return_series: Option<&'a [PeriodReturnPoint]>,
    /// Registered customers only; guests are excluded upstream.
    pub customers: Option<&'a [CustomerRfm]>,
    /// Product rows as read; a row only needs a return amount to rank.
    pub products: Option<&'a [ReturnEntityRow]>,
}

#[derive(Clone, Debug, Default)]
pub struct InsightEngine {
    config: InsightConfig,
}

impl InsightEngine {
    pub fn new(config: InsightConfig) -> Self {
        Self { config }
    }

    /// Rules run in a fixed order; rules that do not fire are left out.
    pub fn evaluate(&self, inputs: &InsightInputs<'_>) -> Vec<Insight> {
        [
            inputs.return_series.and_then(|series| self.return_spike(series)),
            inputs.customers.and_then(|customers| self.churn_risk(customers)),
            inputs.products.and_then(|products| self.top_loss_products(products)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn return_spike(&self, series: &[PeriodReturnPoint]) -> Option<Insight> {
        if series.is_empty() {
            return None;
        }
        let sum = series
            .iter()
            .try_fold(Decimal::ZERO, |sum, point| sum.checked_add(point.return_rate_pct))?;
        let mean = sum.checked_div(Decimal::from(series.len()))?;
        let threshold = mean.checked_mul(self.config.return_spike_multiplier)?;

        let flagged: Vec<&str> = series
            .iter()
            .filter(|point| point.return_rate_pct > threshold)
            .map(|point| point.period.as_str())
            .collect();
        if flagged.is_empty() {
            return None;
        }

        Some(Insight::new(
            InsightKind::ReturnSpike,
            format!(
                "Return spike: {} returned noticeably more than the window average of {}%",
                flagged.join(", "),
                one_decimal(mean)
            ),
        ))
    }

    pub fn churn_risk(&self, customers: &[CustomerRfm]) -> Option<Insight> {
        if customers.is_empty() {
            return None;
        }
        let total = Decimal::from(customers.len());
        let at_risk = customers
            .iter()
            .filter(|customer| {
                matches!(customer.segment(), RfmCategory::AtRisk | RfmCategory::Lost)
            })
            .count();
        let threshold = total.checked_mul(self.config.churn_share_threshold)?;
        if Decimal::from(at_risk) <= threshold {
            return None;
        }

        let share = ratio_or_zero(Decimal::from(at_risk), total) * Decimal::ONE_HUNDRED;
        Some(Insight::new(
            InsightKind::ChurnRisk,
            format!(
                "Churn risk: {at_risk} customers ({}%) are 'At Risk' or 'Lost' and need retention action",
                one_decimal(share)
            ),
        ))
    }

    /// Largest return amounts first; equal amounts keep input order. Rows without
    /// an amount are skipped.
    pub fn top_loss_products(&self, products: &[ReturnEntityRow]) -> Option<Insight> {
        let mut ranked: Vec<(&ReturnEntityRow, Decimal)> = products
            .iter()
            .filter_map(|product| product.loss().map(|loss| (product, loss)))
            .collect();
        ranked.sort_by(|left, right| right.1.cmp(&left.1));
        ranked.truncate(self.config.top_loss_products);
        if ranked.is_empty() {
            return None;
        }

        let keys: Vec<&str> = ranked
            .iter()
            .map(|(product, _)| product.entity_key.as_deref().unwrap_or("(unnamed)"))
            .collect();
        let total = ranked
            .iter()
            .try_fold(Decimal::ZERO, |total, (_, loss)| total.checked_add(*loss))
            .unwrap_or(Decimal::ZERO);

        Some(Insight::new(
            InsightKind::TopLossProducts,
            format!(
                "Top loss products: {} account for the largest return losses (total {}); review product quality and service handling",
                keys.join(", "),
                format_currency(total)
            ),
        ))
    }
}

fn one_decimal(value: Decimal) -> String {
    let mut rounded = value.round_dp(1);
    rounded.rescale(1);
    rounded.to_string()
}

/// Whole-dollar amount with thousands separators, e.g. `$12,345`.
pub fn format_currency(amount: Decimal) -> String {
    let digits = amount.abs().round_dp(0).trunc().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("${grouped}")
}
