use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::PluginError;

static RE_PLUGIN_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").unwrap());

pub const MAX_PLUGIN_NAME_LEN: usize = 50;
pub const DEFAULT_SOFT_TIME_LIMIT_SECS: u64 = 60;

/// Family a plugin belongs to. Job pipelines run analyzers, then connectors,
/// then visualizers; ingestors run standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    Analyzer,
    Connector,
    Visualizer,
    Ingestor,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Analyzer => "analyzer",
            PluginKind::Connector => "connector",
            PluginKind::Visualizer => "visualizer",
            PluginKind::Ingestor => "ingestor",
        }
    }

    /// Stage order inside a job pipeline; `None` for kinds that never run there.
    pub fn stage_order(&self) -> Option<u8> {
        match self {
            PluginKind::Analyzer => Some(0),
            PluginKind::Connector => Some(1),
            PluginKind::Visualizer => Some(2),
            PluginKind::Ingestor => None,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyzer" => Ok(PluginKind::Analyzer),
            "connector" => Ok(PluginKind::Connector),
            "visualizer" => Ok(PluginKind::Visualizer),
            "ingestor" => Ok(PluginKind::Ingestor),
            other => Err(format!("unknown plugin kind '{}'", other)),
        }
    }
}

/// One installable unit of analysis logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Primary key. Word characters only.
    pub name: String,
    pub kind: PluginKind,
    /// Registry key of the plugin implementation.
    pub plugin_path: String,
    pub queue: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default = "default_soft_time_limit")]
    pub soft_time_limit: u64,
    /// Byte cap on the stored report payload.
    #[serde(default)]
    pub max_size_report: Option<usize>,
}

fn default_soft_time_limit() -> u64 {
    DEFAULT_SOFT_TIME_LIMIT_SECS
}

impl PluginConfig {
    pub fn new(name: &str, kind: PluginKind, plugin_path: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            plugin_path: plugin_path.to_string(),
            queue: crate::broker::DEFAULT_QUEUE.to_string(),
            disabled: false,
            params: Map::new(),
            soft_time_limit: DEFAULT_SOFT_TIME_LIMIT_SECS,
            max_size_report: None,
        }
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit)
    }
}

/// Rejects names that are empty, too long, or contain anything but `[A-Za-z0-9_]`.
pub fn validate_plugin_name(name: &str) -> Result<(), PluginError> {
    if name.len() > MAX_PLUGIN_NAME_LEN || !RE_PLUGIN_NAME.is_match(name) {
        return Err(PluginError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_plugin_name() {
        assert!(validate_plugin_name("Classic_DNS").is_ok());
        assert!(validate_plugin_name("VirusTotal_v3_Get_File").is_ok());
        assert!(validate_plugin_name("").is_err());
        assert!(validate_plugin_name("has space").is_err());
        assert!(validate_plugin_name("dash-ed").is_err());
        assert!(validate_plugin_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_kind_roundtrip_and_order() {
        for kind in [
            PluginKind::Analyzer,
            PluginKind::Connector,
            PluginKind::Visualizer,
            PluginKind::Ingestor,
        ] {
            assert_eq!(kind.as_str().parse::<PluginKind>().unwrap(), kind);
        }
        assert!(PluginKind::Analyzer.stage_order() < PluginKind::Connector.stage_order());
        assert!(PluginKind::Connector.stage_order() < PluginKind::Visualizer.stage_order());
        assert_eq!(PluginKind::Ingestor.stage_order(), None);
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: PluginConfig = serde_json::from_str(
            r#"{"name": "Yara", "kind": "analyzer", "plugin_path": "sift.analyzers.Yara", "queue": "local"}"#,
        )
        .unwrap();
        assert!(!config.disabled);
        assert!(config.params.is_empty());
        assert_eq!(config.soft_time_limit(), Duration::from_secs(60));
        assert_eq!(config.max_size_report, None);
    }
}
