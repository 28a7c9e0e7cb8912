//! In-memory tables and the named bundle the derivation pass reads from.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DerivationError;
use crate::schema::{Field, SchemaMapping};

/// Logical input tables known to the derivation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Periods,
    AovArpu,
    Customers,
    ProductReturns,
    CustomerReturns,
    AbnormalProducts,
}

impl TableKind {
    pub const ALL: [TableKind; 6] = [
        TableKind::Periods,
        TableKind::AovArpu,
        TableKind::Customers,
        TableKind::ProductReturns,
        TableKind::CustomerReturns,
        TableKind::AbnormalProducts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Periods => "periods",
            Self::AovArpu => "aov_arpu",
            Self::Customers => "customers",
            Self::ProductReturns => "product_returns",
            Self::CustomerReturns => "customer_returns",
            Self::AbnormalProducts => "abnormal_products",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown table `{value}`"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Number(Decimal),
    Text(String),
}

/// Outcome of reading a cell as a number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Numeric {
    Missing,
    Value(Decimal),
    Invalid(String),
}

impl Numeric {
    pub fn value(self) -> Option<Decimal> {
        match self {
            Self::Value(value) => Some(value),
            Self::Missing | Self::Invalid(_) => None,
        }
    }
}

impl Cell {
    /// Parses raw text the way a spreadsheet export reads: blank is empty,
    /// anything decimal-shaped is a number, everything else stays text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        match parse_decimal(trimmed) {
            Some(value) => Self::Number(value),
            None => Self::Text(trimmed.to_string()),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn number(value: impl Into<Decimal>) -> Self {
        Self::Number(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::Number(_) => false,
        }
    }

    pub fn numeric(&self) -> Numeric {
        match self {
            Self::Empty => Numeric::Missing,
            Self::Number(value) => Numeric::Value(*value),
            Self::Text(text) if text.trim().is_empty() => Numeric::Missing,
            Self::Text(text) => match parse_decimal(text.trim()) {
                Some(value) => Numeric::Value(value),
                None => Numeric::Invalid(text.clone()),
            },
        }
    }

    /// Display text of the cell; numbers drop trailing zeros so `12346.0` reads `12346`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Number(value) => Some(value.normalize().to_string()),
            Self::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value).ok().or_else(|| Decimal::from_scientific(value).ok())
}

/// A rectangular table with named columns.
///
/// Field resolution against a [`SchemaMapping`] is stored on the table so later
/// lookups never rescan column names.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    resolved: BTreeMap<Field, usize>,
}

impl Table {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
    ) -> Result<Self, DerivationError> {
        let name = name.into();
        if let Some((index, row)) =
            rows.iter().enumerate().find(|(_, row)| row.len() != columns.len())
        {
            return Err(DerivationError::MalformedTable {
                reason: format!(
                    "row {} has {} cells, expected {}",
                    index + 1,
                    row.len(),
                    columns.len()
                ),
                table: name,
            });
        }

        Ok(Self { name, columns, rows, resolved: BTreeMap::new() })
    }

    /// Builds a table from string literals, parsing every cell with [`Cell::parse`].
    pub fn from_rows(
        name: impl Into<String>,
        columns: &[&str],
        rows: &[&[&str]],
    ) -> Result<Self, DerivationError> {
        Self::new(
            name,
            columns.iter().map(|column| column.to_string()).collect(),
            rows.iter().map(|row| row.iter().map(|raw| Cell::parse(raw)).collect()).collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// At least one row and one column.
    pub fn is_present(&self) -> bool {
        !self.columns.is_empty() && !self.rows.is_empty()
    }

    pub fn resolve(&mut self, mapping: &SchemaMapping, kind: TableKind) {
        self.resolved =
            mapping.table(kind).map(|schema| schema.resolve(&self.columns)).unwrap_or_default();
    }

    pub fn column(&self, field: Field) -> Option<usize> {
        self.resolved.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.resolved.contains_key(&field)
    }

    pub fn column_name(&self, field: Field) -> Option<&str> {
        self.column(field).and_then(|index| self.columns.get(index)).map(String::as_str)
    }

    pub fn cell(&self, row: usize, field: Field) -> Option<&Cell> {
        let index = self.column(field)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    /// Copy of this table holding only the rows `keep` accepts, in original order.
    pub fn retain_rows(&self, mut keep: impl FnMut(&[Cell]) -> bool) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
            resolved: self.resolved.clone(),
        }
    }
}

/// Typed row access with diagnostics for one table kind.
pub(crate) struct RowReader<'a> {
    table: &'a Table,
    kind: TableKind,
    diagnostics: Vec<DerivationError>,
}

impl<'a> RowReader<'a> {
    /// Reports every field in `expected` the table could not resolve.
    pub(crate) fn new(table: &'a Table, kind: TableKind, expected: &[Field]) -> Self {
        let diagnostics = expected
            .iter()
            .filter(|field| !table.has(**field))
            .map(|field| DerivationError::missing_column(kind, *field))
            .collect();
        Self { table, kind, diagnostics }
    }

    pub(crate) fn rows(&self) -> usize {
        self.table.row_count()
    }

    pub(crate) fn text(&self, row: usize, field: Field) -> Option<String> {
        self.table.cell(row, field).and_then(Cell::to_text)
    }

    pub(crate) fn decimal(&mut self, row: usize, field: Field) -> Option<Decimal> {
        match self.table.cell(row, field).map(Cell::numeric)? {
            Numeric::Value(value) => Some(value),
            Numeric::Missing => None,
            Numeric::Invalid(value) => {
                self.non_numeric(row, field, value);
                None
            }
        }
    }

    /// Non-negative whole numbers; anything else is reported as non-numeric.
    pub(crate) fn count(&mut self, row: usize, field: Field) -> Option<u64> {
        let value = self.decimal(row, field)?;
        match (value.fract().is_zero(), value.to_u64()) {
            (true, Some(count)) => Some(count),
            _ => {
                self.non_numeric(row, field, value.to_string());
                None
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<DerivationError> {
        self.diagnostics
    }

    fn non_numeric(&mut self, row: usize, field: Field, value: String) {
        self.diagnostics.push(DerivationError::NonNumericValue {
            table: self.kind,
            field,
            row: row + 1,
            value,
        });
    }
}

/// Named tables for one derivation pass.
///
/// Tables that failed structural checks are kept as rejections so the pass can
/// report them once while every other section still derives.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSet {
    schema: SchemaMapping,
    tables: BTreeMap<TableKind, Table>,
    rejected: BTreeMap<TableKind, DerivationError>,
}

impl Default for TableSet {
    fn default() -> Self {
        Self::new(SchemaMapping::default())
    }
}

impl TableSet {
    pub fn new(schema: SchemaMapping) -> Self {
        Self { schema, tables: BTreeMap::new(), rejected: BTreeMap::new() }
    }

    /// Stores `table` under `kind`, resolving its columns against the schema.
    pub fn insert(&mut self, kind: TableKind, mut table: Table) {
        table.resolve(&self.schema, kind);
        self.rejected.remove(&kind);
        self.tables.insert(kind, table);
    }

    /// Records why `kind` could not be loaded. A later `insert` clears it.
    pub fn reject(&mut self, kind: TableKind, error: DerivationError) {
        self.tables.remove(&kind);
        self.rejected.insert(kind, error);
    }

    pub fn insert_result(&mut self, kind: TableKind, table: Result<Table, DerivationError>) {
        match table {
            Ok(table) => self.insert(kind, table),
            Err(error) => self.reject(kind, error),
        }
    }

    pub fn rejected(&self) -> impl Iterator<Item = (TableKind, &DerivationError)> + '_ {
        self.rejected.iter().map(|(kind, error)| (*kind, error))
    }

    pub fn with_table(mut self, kind: TableKind, table: Table) -> Self {
        self.insert(kind, table);
        self
    }

    pub fn get(&self, kind: TableKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    /// The table if it was provided and is present, otherwise a `MissingTable` diagnostic.
    pub fn present(&self, kind: TableKind) -> Result<&Table, DerivationError> {
        self.get(kind)
            .filter(|table| table.is_present())
            .ok_or_else(|| DerivationError::missing_table(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = TableKind> + '_ {
        self.tables.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Cell, Numeric, RowReader, Table, TableKind, TableSet};
    use crate::errors::DerivationError;
    use crate::schema::Field;

    #[test]
    fn cell_parse_distinguishes_numbers_text_and_blanks() {
        assert_eq!(Cell::parse("  "), Cell::Empty);
        assert_eq!(Cell::parse("12.50"), Cell::Number(Decimal::new(1250, 2)));
        assert_eq!(Cell::parse("1e3"), Cell::Number(Decimal::new(1000, 0)));
        assert_eq!(Cell::parse(" GUEST "), Cell::text("GUEST"));
    }

    #[test]
    fn numeric_text_cells_are_coerced_and_junk_is_invalid() {
        assert_eq!(Cell::text("42").numeric(), Numeric::Value(Decimal::new(42, 0)));
        assert_eq!(Cell::text("n/a").numeric(), Numeric::Invalid("n/a".to_string()));
        assert_eq!(Cell::Empty.numeric(), Numeric::Missing);
    }

    #[test]
    fn number_cells_render_without_trailing_zeros() {
        assert_eq!(Cell::Number(Decimal::new(123460, 1)).to_text().as_deref(), Some("12346"));
    }

    #[test]
    fn ragged_rows_are_malformed() {
        let result = Table::from_rows("mom", &["YearMonth", "Revenue"], &[&["2011-01"]]);

        assert!(matches!(result, Err(DerivationError::MalformedTable { .. })));
    }

    #[test]
    fn table_without_rows_is_not_present() {
        let table = Table::from_rows("mom", &["YearMonth"], &[]).expect("table");
        let tables = TableSet::default().with_table(TableKind::Periods, table);

        assert!(matches!(
            tables.present(TableKind::Periods),
            Err(DerivationError::MissingTable { table: TableKind::Periods })
        ));
        assert!(tables.get(TableKind::Periods).is_some());
        assert!(tables.present(TableKind::Customers).is_err());
    }

    #[test]
    fn rejected_tables_are_absent_and_listed() {
        let mut tables = TableSet::default();
        tables.insert_result(
            TableKind::Customers,
            Table::from_rows("rfm", &["CustomerID", "Monetary"], &[&["1"]]),
        );

        assert!(tables.present(TableKind::Customers).is_err());
        let rejected: Vec<TableKind> = tables.rejected().map(|(kind, _)| kind).collect();
        assert_eq!(rejected, vec![TableKind::Customers]);

        let fixed = Table::from_rows("rfm", &["CustomerID"], &[&["1"]]).expect("table");
        tables.insert(TableKind::Customers, fixed);
        assert_eq!(tables.rejected().count(), 0);
    }

    #[test]
    fn insert_resolves_columns_once() {
        let table = Table::from_rows(
            "rfm",
            &["Customer ID", "Monetary", "Category"],
            &[&["12346", "100", "Loyal"]],
        )
        .expect("table");
        let tables = TableSet::default().with_table(TableKind::Customers, table);
        let stored = tables.present(TableKind::Customers).expect("present");

        assert_eq!(stored.column(Field::CustomerId), Some(0));
        assert_eq!(stored.column_name(Field::Monetary), Some("Monetary"));
        assert!(!stored.has(Field::TotalScore));
    }

    #[test]
    fn retain_rows_keeps_order_and_resolution() {
        let table = Table::from_rows(
            "mom",
            &["YearMonth", "Revenue"],
            &[&["2011-01", "1"], &["2011-02", "2"], &["2011-03", "3"]],
        )
        .expect("table");
        let tables = TableSet::default().with_table(TableKind::Periods, table);
        let stored = tables.present(TableKind::Periods).expect("present");

        let filtered = stored.retain_rows(|row| row[0] != Cell::text("2011-02"));

        assert_eq!(filtered.row_count(), 2);
        assert_eq!(filtered.cell(1, Field::Revenue), Some(&Cell::number(3)));
    }

    #[test]
    fn row_reader_reports_missing_columns_and_bad_counts() {
        let mut table = Table::from_rows(
            "mom",
            &["YearMonth", "Normal_Orders"],
            &[&["2011-01", "10.5"], &["2011-02", "-1"], &["2011-03", "7"]],
        )
        .expect("table");
        table.resolve(&Default::default(), TableKind::Periods);

        let mut reader =
            RowReader::new(&table, TableKind::Periods, &[Field::NormalOrders, Field::Revenue]);
        assert_eq!(reader.count(0, Field::NormalOrders), None);
        assert_eq!(reader.count(1, Field::NormalOrders), None);
        assert_eq!(reader.count(2, Field::NormalOrders), Some(7));
        let diagnostics = reader.finish();

        assert_eq!(diagnostics.len(), 3);
        assert!(matches!(
            diagnostics[0],
            DerivationError::MissingColumn { field: Field::Revenue, .. }
        ));
        assert!(matches!(diagnostics[1], DerivationError::NonNumericValue { row: 1, .. }));
    }
}
