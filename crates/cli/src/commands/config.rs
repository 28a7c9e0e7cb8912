use std::env;
use std::fs;
use std::path::Path;

use pulseboard_core::config::{resolve_config_path, AppConfig, LoadOptions};
use pulseboard_core::TableKind;
use toml::Value;

use crate::commands::CommandResult;

struct ConfigSource<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl ConfigSource<'_> {
    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        render_line(key_path, value, field_source(key_path, env_keys, self.doc, self.path))
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult {
                exit_code: 2,
                output: format!("config validation failed: {error}"),
            }
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = ConfigSource { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(source.line(
        "window.year_prefix",
        &config.window.year_prefix,
        &["PULSEBOARD_WINDOW_YEAR_PREFIX"],
    ));
    let exclude_month =
        config.window.exclude_month.map(|month| month.to_string()).unwrap_or_else(|| "<none>".into());
    lines.push(source.line(
        "window.exclude_month",
        &exclude_month,
        &["PULSEBOARD_WINDOW_EXCLUDE_MONTH"],
    ));

    lines.push(source.line(
        "segmentation.guest_sentinel",
        &config.segmentation.guest_sentinel,
        &["PULSEBOARD_SEGMENTATION_GUEST_SENTINEL"],
    ));

    lines.push(source.line(
        "insights.return_spike_multiplier",
        &config.insights.return_spike_multiplier.to_string(),
        &["PULSEBOARD_INSIGHTS_RETURN_SPIKE_MULTIPLIER"],
    ));
    lines.push(source.line(
        "insights.churn_share_threshold",
        &config.insights.churn_share_threshold.to_string(),
        &["PULSEBOARD_INSIGHTS_CHURN_SHARE_THRESHOLD"],
    ));
    lines.push(source.line(
        "insights.top_loss_products",
        &config.insights.top_loss_products.to_string(),
        &["PULSEBOARD_INSIGHTS_TOP_LOSS_PRODUCTS"],
    ));

    lines.push(source.line(
        "sources.base_dir",
        &config.sources.base_dir.display().to_string(),
        &["PULSEBOARD_SOURCES_BASE_DIR"],
    ));
    for kind in TableKind::ALL {
        let candidates = config
            .sources
            .paths(kind)
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(source.line(&format!("sources.candidates.{kind}"), &candidates, &[]));
    }

    lines.push(source.line(
        "logging.level",
        &config.logging.level,
        &["PULSEBOARD_LOGGING_LEVEL", "PULSEBOARD_LOG_LEVEL"],
    ));
    lines.push(source.line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        &["PULSEBOARD_LOGGING_FORMAT", "PULSEBOARD_LOG_FORMAT"],
    ));

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_the_file_doc() {
        let doc: toml::Value =
            "[window]\nyear_prefix = \"2012\"\n[sources.candidates]\nperiods = [\"m.csv\"]\n"
                .parse()
                .expect("toml");

        assert!(contains_path(&doc, "window.year_prefix"));
        assert!(contains_path(&doc, "sources.candidates.periods"));
        assert!(!contains_path(&doc, "window.exclude_month"));
    }

    #[test]
    fn unset_keys_fall_back_to_default() {
        let source = field_source("logging.level", &["PULSEBOARD_TEST_UNSET_KEY"], None, None);

        assert_eq!(source, "default");
    }
}
