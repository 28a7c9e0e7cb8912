use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::insights::InsightConfig;
use crate::period::PeriodWindow;
use crate::report::AnalysisConfig;
use crate::schema::{ColumnMatcher, Field, SchemaMapping};
use crate::segmentation::DEFAULT_GUEST_SENTINEL;
use crate::table::TableKind;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["pulseboard.toml", "config/pulseboard.toml"];

/// Every environment variable the loader reads.
pub const ENV_KEYS: [&str; 11] = [
    "PULSEBOARD_WINDOW_YEAR_PREFIX",
    "PULSEBOARD_WINDOW_EXCLUDE_MONTH",
    "PULSEBOARD_SEGMENTATION_GUEST_SENTINEL",
    "PULSEBOARD_INSIGHTS_RETURN_SPIKE_MULTIPLIER",
    "PULSEBOARD_INSIGHTS_CHURN_SHARE_THRESHOLD",
    "PULSEBOARD_INSIGHTS_TOP_LOSS_PRODUCTS",
    "PULSEBOARD_SOURCES_BASE_DIR",
    "PULSEBOARD_LOGGING_LEVEL",
    "PULSEBOARD_LOGGING_FORMAT",
    "PULSEBOARD_LOG_LEVEL",
    "PULSEBOARD_LOG_FORMAT",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub segmentation: SegmentationConfig,
    pub insights: InsightConfig,
    pub sources: SourcesConfig,
    pub schema: SchemaMapping,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub year_prefix: String,
    /// `None` keeps the whole year.
    pub exclude_month: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentationConfig {
    pub guest_sentinel: String,
}

/// Where each logical table may be found, tried in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcesConfig {
    pub base_dir: PathBuf,
    pub candidates: BTreeMap<TableKind, Vec<PathBuf>>,
}

impl SourcesConfig {
    /// Candidate paths for `kind`, joined onto `base_dir` unless already absolute.
    pub fn paths(&self, kind: TableKind) -> Vec<PathBuf> {
        self.candidates
            .get(&kind)
            .map(|paths| paths.iter().map(|path| self.base_dir.join(path)).collect())
            .unwrap_or_default()
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let summary = |file: &str| {
            vec![PathBuf::from("summary").join(file), PathBuf::from(file)]
        };
        let returns = |file: &str| {
            vec![
                PathBuf::from("returns_2011_11").join(file),
                PathBuf::from("returns").join(file),
            ]
        };

        Self {
            base_dir: PathBuf::from("."),
            candidates: BTreeMap::from([
                (TableKind::Periods, summary("mom.csv")),
                (TableKind::AovArpu, summary("aov_arpu.csv")),
                (TableKind::Customers, summary("rfm.csv")),
                (TableKind::ProductReturns, returns("return_product.csv")),
                (TableKind::CustomerReturns, returns("return_customer.csv")),
                (TableKind::AbnormalProducts, returns("abnormal_product.csv")),
            ]),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub year_prefix: Option<String>,
    /// `Some(0)` disables the exclusion.
    pub exclude_month: Option<u32>,
    pub guest_sentinel: Option<String>,
    pub sources_base_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let window = PeriodWindow::default();
        Self {
            window: WindowConfig {
                year_prefix: window.year_prefix,
                exclude_month: window.exclude_month,
            },
            segmentation: SegmentationConfig { guest_sentinel: DEFAULT_GUEST_SENTINEL.to_string() },
            insights: InsightConfig::default(),
            sources: SourcesConfig::default(),
            schema: SchemaMapping::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options
                .config_path
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Settings consumed by a derivation pass.
    pub fn analysis(&self) -> AnalysisConfig {
        AnalysisConfig {
            window: PeriodWindow::new(self.window.year_prefix.clone(), self.window.exclude_month),
            guest_sentinel: self.segmentation.guest_sentinel.clone(),
            insights: self.insights.clone(),
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(window) = patch.window {
            if let Some(year_prefix) = window.year_prefix {
                self.window.year_prefix = year_prefix;
            }
            if let Some(exclude_month) = window.exclude_month {
                self.window.exclude_month = month_or_none(exclude_month);
            }
        }

        if let Some(segmentation) = patch.segmentation {
            if let Some(guest_sentinel) = segmentation.guest_sentinel {
                self.segmentation.guest_sentinel = guest_sentinel;
            }
        }

        if let Some(insights) = patch.insights {
            if let Some(multiplier) = insights.return_spike_multiplier {
                self.insights.return_spike_multiplier = multiplier;
            }
            if let Some(threshold) = insights.churn_share_threshold {
                self.insights.churn_share_threshold = threshold;
            }
            if let Some(top_loss_products) = insights.top_loss_products {
                self.insights.top_loss_products = top_loss_products;
            }
        }

        if let Some(sources) = patch.sources {
            if let Some(base_dir) = sources.base_dir {
                self.sources.base_dir = base_dir;
            }
            for (kind, paths) in sources.candidates.unwrap_or_default() {
                self.sources.candidates.insert(parse_key("sources.candidates", &kind)?, paths);
            }
        }

        if let Some(schema) = patch.schema {
            for (kind, fields) in schema {
                let kind: TableKind = parse_key("schema", &kind)?;
                for (field, matcher) in fields {
                    let field: Field = parse_key(&format!("schema.{kind}"), &field)?;
                    self.schema.set(kind, field, matcher);
                }
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PULSEBOARD_WINDOW_YEAR_PREFIX") {
            self.window.year_prefix = value;
        }
        if let Some(value) = read_env("PULSEBOARD_WINDOW_EXCLUDE_MONTH") {
            self.window.exclude_month =
                month_or_none(parse_u32("PULSEBOARD_WINDOW_EXCLUDE_MONTH", &value)?);
        }

        if let Some(value) = read_env("PULSEBOARD_SEGMENTATION_GUEST_SENTINEL") {
            self.segmentation.guest_sentinel = value;
        }

        if let Some(value) = read_env("PULSEBOARD_INSIGHTS_RETURN_SPIKE_MULTIPLIER") {
            self.insights.return_spike_multiplier =
                parse_decimal("PULSEBOARD_INSIGHTS_RETURN_SPIKE_MULTIPLIER", &value)?;
        }
        if let Some(value) = read_env("PULSEBOARD_INSIGHTS_CHURN_SHARE_THRESHOLD") {
            self.insights.churn_share_threshold =
                parse_decimal("PULSEBOARD_INSIGHTS_CHURN_SHARE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PULSEBOARD_INSIGHTS_TOP_LOSS_PRODUCTS") {
            self.insights.top_loss_products =
                parse_usize("PULSEBOARD_INSIGHTS_TOP_LOSS_PRODUCTS", &value)?;
        }

        if let Some(value) = read_env("PULSEBOARD_SOURCES_BASE_DIR") {
            self.sources.base_dir = PathBuf::from(value);
        }

        let log_level =
            read_env("PULSEBOARD_LOGGING_LEVEL").or_else(|| read_env("PULSEBOARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PULSEBOARD_LOGGING_FORMAT").or_else(|| read_env("PULSEBOARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(year_prefix) = overrides.year_prefix {
            self.window.year_prefix = year_prefix;
        }
        if let Some(exclude_month) = overrides.exclude_month {
            self.window.exclude_month = month_or_none(exclude_month);
        }
        if let Some(guest_sentinel) = overrides.guest_sentinel {
            self.segmentation.guest_sentinel = guest_sentinel;
        }
        if let Some(base_dir) = overrides.sources_base_dir {
            self.sources.base_dir = base_dir;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window(&self.window)?;
        validate_segmentation(&self.segmentation)?;
        validate_insights(&self.insights)?;
        validate_schema(&self.schema)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The config file the loader would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn parse_key<T: FromStr<Err = String>>(section: &str, key: &str) -> Result<T, ConfigError> {
    key.parse().map_err(|reason| ConfigError::Validation(format!("{section}: {reason}")))
}

fn month_or_none(month: u32) -> Option<u32> {
    (month != 0).then_some(month)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_window(window: &WindowConfig) -> Result<(), ConfigError> {
    let prefix = window.year_prefix.trim();
    if prefix.len() != 4 || !prefix.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "window.year_prefix must be a four-digit year, got `{}`",
            window.year_prefix
        )));
    }

    if let Some(month) = window.exclude_month {
        if !(1..=12).contains(&month) {
            return Err(ConfigError::Validation(
                "window.exclude_month must be in range 1..=12 (0 disables it)".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_segmentation(segmentation: &SegmentationConfig) -> Result<(), ConfigError> {
    if segmentation.guest_sentinel.trim().is_empty() {
        return Err(ConfigError::Validation(
            "segmentation.guest_sentinel must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_insights(insights: &InsightConfig) -> Result<(), ConfigError> {
    if insights.return_spike_multiplier <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "insights.return_spike_multiplier must be greater than zero".to_string(),
        ));
    }

    let threshold = insights.churn_share_threshold;
    if threshold <= Decimal::ZERO || threshold > Decimal::ONE {
        return Err(ConfigError::Validation(
            "insights.churn_share_threshold must be in range (0, 1]".to_string(),
        ));
    }

    if insights.top_loss_products == 0 {
        return Err(ConfigError::Validation(
            "insights.top_loss_products must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_schema(schema: &SchemaMapping) -> Result<(), ConfigError> {
    for kind in TableKind::ALL {
        let Some(table) = schema.table(kind) else {
            continue;
        };
        for (field, matcher) in table.fields() {
            let blank = matcher.names.iter().all(|name| name.trim().is_empty())
                && matcher.keywords.iter().all(|keyword| keyword.trim().is_empty());
            if blank {
                return Err(ConfigError::Validation(format!(
                    "schema.{kind}.{field} needs at least one name or keyword"
                )));
            }
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    window: Option<WindowPatch>,
    segmentation: Option<SegmentationPatch>,
    insights: Option<InsightsPatch>,
    sources: Option<SourcesPatch>,
    schema: Option<BTreeMap<String, BTreeMap<String, ColumnMatcher>>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct WindowPatch {
    year_prefix: Option<String>,
    exclude_month: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SegmentationPatch {
    guest_sentinel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InsightsPatch {
    return_spike_multiplier: Option<Decimal>,
    churn_share_threshold: Option<Decimal>,
    top_loss_products: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SourcesPatch {
    base_dir: Option<PathBuf>,
    candidates: Option<BTreeMap<String, Vec<PathBuf>>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
