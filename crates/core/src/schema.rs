//! Column discovery for input tables.
//!
//! Each logical field of a table is described by a [`ColumnMatcher`]: exact
//! names tried first, then case-insensitive substring keywords. Matching walks
//! the columns in declared order and returns the first hit. Resolution runs once
//! when a table enters a [`TableSet`](crate::table::TableSet) and is cached on it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::table::TableKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Period,
    Revenue,
    NormalOrders,
    ReturnOrders,
    Customers,
    ReturnAmount,
    Aov,
    Arpu,
    CustomerId,
    Recency,
    Frequency,
    Monetary,
    TotalScore,
    Category,
    EntityKey,
    ReturnRate,
    ReturnCount,
}

impl Field {
    pub const ALL: [Field; 17] = [
        Field::Period,
        Field::Revenue,
        Field::NormalOrders,
        Field::ReturnOrders,
        Field::Customers,
        Field::ReturnAmount,
        Field::Aov,
        Field::Arpu,
        Field::CustomerId,
        Field::Recency,
        Field::Frequency,
        Field::Monetary,
        Field::TotalScore,
        Field::Category,
        Field::EntityKey,
        Field::ReturnRate,
        Field::ReturnCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Revenue => "revenue",
            Self::NormalOrders => "normal_orders",
            Self::ReturnOrders => "return_orders",
            Self::Customers => "customers",
            Self::ReturnAmount => "return_amount",
            Self::Aov => "aov",
            Self::Arpu => "arpu",
            Self::CustomerId => "customer_id",
            Self::Recency => "recency",
            Self::Frequency => "frequency",
            Self::Monetary => "monetary",
            Self::TotalScore => "total_score",
            Self::Category => "category",
            Self::EntityKey => "entity_key",
            Self::ReturnRate => "return_rate",
            Self::ReturnCount => "return_count",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == normalized)
            .ok_or_else(|| format!("unknown field `{value}`"))
    }
}

/// Accepted column names for one logical field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMatcher {
    /// Compared trimmed and case-insensitive against whole column names.
    #[serde(default)]
    pub names: Vec<String>,
    /// Case-insensitive substrings, tried only when no exact name matched.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ColumnMatcher {
    pub fn new(names: &[&str], keywords: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
        }
    }

    pub fn exact(names: &[&str]) -> Self {
        Self::new(names, &[])
    }

    /// Index of the first matching column, or `None`.
    pub fn find<S: AsRef<str>>(&self, columns: &[S]) -> Option<usize> {
        let names: Vec<String> =
            self.names.iter().map(|name| name.trim().to_lowercase()).collect();
        let exact = columns
            .iter()
            .position(|column| names.contains(&column.as_ref().trim().to_lowercase()));
        if exact.is_some() {
            return exact;
        }

        let keywords: Vec<String> = self
            .keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        columns.iter().position(|column| {
            let column = column.as_ref().to_lowercase();
            keywords.iter().any(|keyword| column.contains(keyword.as_str()))
        })
    }
}

/// Matchers for the fields of one table kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    fields: BTreeMap<Field, ColumnMatcher>,
}

impl TableSchema {
    pub fn with(mut self, field: Field, matcher: ColumnMatcher) -> Self {
        self.fields.insert(field, matcher);
        self
    }

    pub fn set(&mut self, field: Field, matcher: ColumnMatcher) {
        self.fields.insert(field, matcher);
    }

    pub fn matcher(&self, field: Field) -> Option<&ColumnMatcher> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &ColumnMatcher)> {
        self.fields.iter().map(|(field, matcher)| (*field, matcher))
    }

    /// Resolves every declared field against `columns`; unmatched fields are left out.
    pub fn resolve<S: AsRef<str>>(&self, columns: &[S]) -> BTreeMap<Field, usize> {
        self.fields
            .iter()
            .filter_map(|(field, matcher)| matcher.find(columns).map(|index| (*field, index)))
            .collect()
    }
}

/// Injectable mapping from table kind and logical field to accepted column names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaMapping {
    tables: BTreeMap<TableKind, TableSchema>,
}

impl SchemaMapping {
    pub fn empty() -> Self {
        Self { tables: BTreeMap::new() }
    }

    pub fn table(&self, kind: TableKind) -> Option<&TableSchema> {
        self.tables.get(&kind)
    }

    pub fn set(&mut self, kind: TableKind, field: Field, matcher: ColumnMatcher) {
        self.tables.entry(kind).or_default().set(field, matcher);
    }

    pub fn with(mut self, kind: TableKind, field: Field, matcher: ColumnMatcher) -> Self {
        self.set(kind, field, matcher);
        self
    }
}

impl Default for SchemaMapping {
    fn default() -> Self {
        let period = || ColumnMatcher::exact(&["YearMonth", "Year_Month", "Period", "Month"]);

        let periods = TableSchema::default()
            .with(Field::Period, period())
            .with(Field::Revenue, ColumnMatcher::exact(&["Revenue"]))
            .with(Field::NormalOrders, ColumnMatcher::exact(&["Normal_Orders", "Orders"]))
            .with(Field::ReturnOrders, ColumnMatcher::exact(&["Return_Orders"]))
            .with(Field::Customers, ColumnMatcher::exact(&["Customer", "Customers"]))
            .with(Field::ReturnAmount, ColumnMatcher::exact(&["Return", "Return_Amount"]));

        let aov_arpu = TableSchema::default()
            .with(Field::Period, period())
            .with(Field::Aov, ColumnMatcher::exact(&["AOV"]))
            .with(Field::Arpu, ColumnMatcher::exact(&["ARPU"]));

        let customers = TableSchema::default()
            .with(
                Field::CustomerId,
                ColumnMatcher::new(
                    &["CustomerID", "Customer ID", "Customer_ID"],
                    &["customerid", "customer id", "customer"],
                ),
            )
            .with(Field::Recency, ColumnMatcher::exact(&["Recency"]))
            .with(Field::Frequency, ColumnMatcher::exact(&["Frequency"]))
            .with(Field::Monetary, ColumnMatcher::exact(&["Monetary"]))
            .with(Field::TotalScore, ColumnMatcher::exact(&["Total_Score", "Total Score"]))
            .with(Field::Category, ColumnMatcher::exact(&["Category", "Segment"]));

        let entity = |key: ColumnMatcher| {
            TableSchema::default()
                .with(Field::EntityKey, key)
                .with(Field::ReturnAmount, ColumnMatcher::new(&["Return_Amount"], &["amount"]))
                .with(Field::ReturnRate, ColumnMatcher::new(&["Return_Rate"], &["rate"]))
                .with(Field::ReturnCount, ColumnMatcher::new(&["Return_Count"], &["count"]))
                .with(Field::Category, ColumnMatcher::exact(&["Category"]))
        };
        let product_key =
            || ColumnMatcher::new(&["StockCode", "Stock_Code", "Entity_Key", "SKU"], &["stock"]);

        let tables = BTreeMap::from([
            (TableKind::Periods, periods),
            (TableKind::AovArpu, aov_arpu),
            (TableKind::Customers, customers),
            (TableKind::ProductReturns, entity(product_key())),
            (
                TableKind::CustomerReturns,
                entity(ColumnMatcher::new(
                    &["CustomerID", "Customer_ID", "Entity_Key"],
                    &["customer", "id"],
                )),
            ),
            (TableKind::AbnormalProducts, entity(product_key())),
        ]);

        Self { tables }
    }
}
