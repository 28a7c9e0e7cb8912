//! CSV-backed source catalog.
//!
//! Each logical table has an ordered list of candidate files. The first one that
//! exists is read; a table with no existing candidate is absent, which the
//! derivation pass treats as a missing table.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SourcesConfig;
use crate::errors::DerivationError;
use crate::schema::SchemaMapping;
use crate::table::{Cell, Table, TableKind, TableSet};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not open `{path}`: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("could not parse csv `{path}`: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("`{path}` is malformed: {source}")]
    Malformed { path: PathBuf, source: DerivationError },
}

impl CatalogError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Open { path, .. } | Self::Csv { path, .. } | Self::Malformed { path, .. } => path,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceResolution {
    Present(PathBuf),
    Absent { tried: Vec<PathBuf> },
}

impl SourceResolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Present(path) => Some(path),
            Self::Absent { .. } => None,
        }
    }
}

/// Ordered candidate files for one logical table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceCandidates {
    pub kind: TableKind,
    pub paths: Vec<PathBuf>,
}

impl SourceCandidates {
    pub fn resolve(&self) -> SourceResolution {
        resolve_first_present(&self.paths)
    }
}

/// The first candidate that exists as a regular file.
pub fn resolve_first_present(candidates: &[PathBuf]) -> SourceResolution {
    candidates
        .iter()
        .find(|path| path.is_file())
        .map(|path| SourceResolution::Present(path.clone()))
        .unwrap_or_else(|| SourceResolution::Absent { tried: candidates.to_vec() })
}

/// Reads a headed CSV into a [`Table`]. Headers and cells are trimmed; cells that
/// look numeric become numbers.
pub fn read_csv_table<R: Read>(path: &Path, reader: R) -> Result<Table, CatalogError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<String> = csv_reader
        .headers()
        .map_err(|source| CatalogError::Csv { path: path.to_path_buf(), source })?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|source| CatalogError::Csv { path: path.to_path_buf(), source })?;
        rows.push(record.iter().map(Cell::parse).collect());
    }

    let name = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("table");
    Table::new(name, columns, rows)
        .map_err(|source| CatalogError::Malformed { path: path.to_path_buf(), source })
}

fn read_csv_file(path: &Path) -> Result<Table, CatalogError> {
    let file =
        File::open(path).map_err(|source| CatalogError::Open { path: path.to_path_buf(), source })?;
    read_csv_table(path, file)
}

/// Result of loading every configured table.
#[derive(Debug)]
pub struct CatalogLoad {
    pub tables: TableSet,
    pub resolutions: Vec<(TableKind, SourceResolution)>,
    pub errors: Vec<CatalogError>,
}

impl CatalogLoad {
    pub fn absent(&self) -> impl Iterator<Item = TableKind> + '_ {
        self.resolutions
            .iter()
            .filter(|(_, resolution)| matches!(resolution, SourceResolution::Absent { .. }))
            .map(|(kind, _)| *kind)
    }
}

#[derive(Clone, Debug)]
pub struct CsvCatalog {
    sources: SourcesConfig,
    schema: SchemaMapping,
}

impl CsvCatalog {
    pub fn new(sources: SourcesConfig, schema: SchemaMapping) -> Self {
        Self { sources, schema }
    }

    pub fn candidates(&self, kind: TableKind) -> SourceCandidates {
        SourceCandidates { kind, paths: self.sources.paths(kind) }
    }

    pub fn resolve_all(&self) -> Vec<(TableKind, SourceResolution)> {
        TableKind::ALL.into_iter().map(|kind| (kind, self.candidates(kind).resolve())).collect()
    }

    /// Loads every present table. Failures are collected, never returned early,
    /// and the failing table is rejected on the set as malformed.
    pub fn load(&self) -> CatalogLoad {
        let mut tables = TableSet::new(self.schema.clone());
        let mut errors = Vec::new();
        let resolutions = self.resolve_all();

        for (kind, resolution) in &resolutions {
            let path = match resolution {
                SourceResolution::Present(path) => path,
                SourceResolution::Absent { tried } => {
                    debug!(
                        event_name = "pulseboard.catalog.table_absent",
                        table = %kind,
                        candidates = tried.len(),
                        "no source file found for table"
                    );
                    continue;
                }
            };

            match read_csv_file(path) {
                Ok(table) => {
                    info!(
                        event_name = "pulseboard.catalog.table_loaded",
                        table = %kind,
                        path = %path.display(),
                        rows = table.row_count(),
                        "table loaded"
                    );
                    tables.insert(*kind, table);
                }
                Err(error) => {
                    warn!(
                        event_name = "pulseboard.catalog.table_failed",
                        table = %kind,
                        error = %error,
                        "table could not be loaded"
                    );
                    tables.reject(
                        *kind,
                        DerivationError::MalformedTable {
                            table: kind.to_string(),
                            reason: error.to_string(),
                        },
                    );
                    errors.push(error);
                }
            }
        }

        CatalogLoad { tables, resolutions, errors }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use super::{read_csv_table, resolve_first_present, CatalogError, CsvCatalog, SourceResolution};
    use crate::config::SourcesConfig;
    use crate::schema::{Field, SchemaMapping};
    use crate::table::{Cell, TableKind};

    const MOM_CSV: &str = "\
YearMonth , Revenue,Normal_Orders,Customer,Return_Orders,Return
2011-01,1000,10,5,1,-50
2011-02,1200.5,12,6,3,-90
";

    #[test]
    fn csv_cells_are_trimmed_and_typed() {
        let table = read_csv_table(Path::new("mom.csv"), MOM_CSV.as_bytes()).expect("table");

        assert_eq!(table.name(), "mom");
        assert_eq!(table.columns()[0], "YearMonth");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[1][1], Cell::Number(rust_decimal::Decimal::new(12005, 1)));
        assert_eq!(table.rows()[0][0], Cell::text("2011-01"));
    }

    #[test]
    fn ragged_csv_is_malformed() {
        let result = read_csv_table(Path::new("rfm.csv"), "a,b\n1,2\n3\n".as_bytes());

        assert!(matches!(result, Err(CatalogError::Malformed { .. })));
    }

    #[test]
    fn first_present_candidate_wins() {
        let dir = TempDir::new().expect("temp dir");
        let second = dir.path().join("b.csv");
        let third = dir.path().join("c.csv");
        fs::write(&second, "x\n1\n").expect("write");
        fs::write(&third, "x\n1\n").expect("write");
        let candidates = vec![dir.path().join("a.csv"), second.clone(), third];

        assert_eq!(resolve_first_present(&candidates), SourceResolution::Present(second));
        assert!(matches!(
            resolve_first_present(&[dir.path().join("missing.csv")]),
            SourceResolution::Absent { ref tried } if tried.len() == 1
        ));
    }

    #[test]
    fn directories_are_not_sources() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("mom.csv");
        fs::create_dir(&nested).expect("mkdir");

        assert!(resolve_first_present(&[nested]).path().is_none());
    }

    #[test]
    fn load_collects_tables_absences_and_failures() {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir(dir.path().join("summary")).expect("mkdir");
        fs::write(dir.path().join("summary/mom.csv"), MOM_CSV).expect("write");
        fs::write(dir.path().join("rfm.csv"), "CustomerID,Monetary\n1,2,3\n").expect("write");
        let sources = SourcesConfig { base_dir: PathBuf::from(dir.path()), ..SourcesConfig::default() };

        let load = CsvCatalog::new(sources, SchemaMapping::default()).load();

        let periods = load.tables.present(TableKind::Periods).expect("periods loaded");
        assert!(periods.has(Field::ReturnAmount));
        assert_eq!(load.errors.len(), 1);
        assert!(load.errors[0].path().ends_with("rfm.csv"));
        assert_eq!(load.tables.rejected().count(), 1);
        let absent: Vec<TableKind> = load.absent().collect();
        assert!(absent.contains(&TableKind::AovArpu));
        assert!(!absent.contains(&TableKind::Customers));
    }
}
