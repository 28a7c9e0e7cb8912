pub mod cache;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod insights;
pub mod metrics;
pub mod period;
pub mod report;
pub mod returns;
pub mod schema;
pub mod segmentation;
pub mod table;

pub use cache::{SourceFingerprint, TableSetCache};
pub use catalog::{
    read_csv_table, resolve_first_present, CatalogError, CatalogLoad, CsvCatalog,
    SourceCandidates, SourceResolution,
};
pub use errors::{DerivationError, Derived};
pub use insights::{Insight, InsightConfig, InsightEngine, InsightInputs, InsightKind};
pub use metrics::{ArpuSeries, GrowthPoint, GrowthSeries, KpiSnapshot, MetricsEngine};
pub use period::{PeriodKey, PeriodRecord, PeriodWindow};
pub use report::{derive_report, AnalysisConfig, DashboardReport, Diagnostic, ReturnSection, Section};
pub use returns::{
    EntityKind, PeriodReturnPoint, ReturnAggregator, ReturnCategoryTotal, ReturnEntity,
    ReturnEntityRow,
};
pub use schema::{ColumnMatcher, Field, SchemaMapping, TableSchema};
pub use segmentation::{
    CategoryShare, CategorySummary, CustomerRfm, GuestComparison, GuestSplit, RfmCategory,
    ScatterPoint, SegmentationEngine, Totalizer,
};
pub use table::{Cell, Table, TableKind, TableSet};
