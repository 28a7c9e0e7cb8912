use serde::Serialize;
use thiserror::Error;

use crate::schema::Field;
use crate::table::TableKind;

/// Recoverable failures met while deriving a report section.
///
/// None of these abort a derivation pass. They travel next to the (possibly
/// degraded) value inside [`Derived`] so callers can render whatever is available.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationError {
    #[error("table `{table}` was not provided or has no rows")]
    MissingTable { table: TableKind },
    #[error("table `{table}` has no column for `{field}`")]
    MissingColumn { table: TableKind, field: Field },
    #[error("table `{table}` row {row}: `{field}` value `{value}` is not numeric")]
    NonNumericValue { table: TableKind, field: Field, row: usize, value: String },
    #[error("table `{table}` is malformed: {reason}")]
    MalformedTable { table: String, reason: String },
}

impl DerivationError {
    pub fn missing_table(table: TableKind) -> Self {
        Self::MissingTable { table }
    }

    pub fn missing_column(table: TableKind, field: Field) -> Self {
        Self::MissingColumn { table, field }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedTable { .. })
    }
}

/// A derived value plus the diagnostics collected while producing it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Derived<T> {
    pub value: T,
    pub diagnostics: Vec<DerivationError>,
}

impl<T> Derived<T> {
    pub fn ok(value: T) -> Self {
        Self { value, diagnostics: Vec::new() }
    }

    pub fn degraded(value: T, error: DerivationError) -> Self {
        Self { value, diagnostics: vec![error] }
    }

    pub fn with_diagnostics(value: T, diagnostics: Vec<DerivationError>) -> Self {
        Self { value, diagnostics }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

}

impl<T: Default> Derived<T> {
    pub fn empty(error: DerivationError) -> Self {
        Self::degraded(T::default(), error)
    }
}
