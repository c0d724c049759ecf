//! Instrument declarations in the config file and include directory.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::InstrumentRecord;

use super::validation::ConfigError;

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_enabled() -> bool {
    true
}

/// One instrument as declared in YAML.
///
/// ```yaml
/// - name: ship-a
///   type: local_dir
///   config: { source_dir: /data/ship-a }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEntry {
    /// Unique instrument name.
    pub name: String,

    /// Retriever type tag. May be omitted; such an instrument is skipped
    /// at collection time with a configuration error.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Retriever configuration, passed through opaquely.
    #[serde(default = "default_config")]
    pub config: serde_json::Value,

    /// Whether the instrument is collected (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl InstrumentEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            config,
            enabled: true,
        }
    }

    pub fn to_record(&self) -> InstrumentRecord {
        InstrumentRecord::new(&self.name, self.kind.as_deref(), self.config.clone())
            .with_enabled(self.enabled)
    }
}

/// File shape of an instrument include file.
#[derive(Debug, Default, Deserialize)]
struct InstrumentsFile {
    #[serde(default)]
    instruments: Vec<InstrumentEntry>,
}

/// Check names are present and unique.
///
/// Type tags are not checked here: an unknown tag only affects its own
/// instrument, at collection time.
pub fn validate_instruments(entries: &[InstrumentEntry]) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();
    for entry in entries {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "instrument name cannot be empty".to_string(),
            ));
        }
        if !seen_names.insert(entry.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate instrument name: '{}'",
                entry.name
            )));
        }
        // A bad shape only costs this instrument; the registry skips it.
        if !entry.config.is_object() {
            tracing::warn!(
                instrument = %entry.name,
                "Instrument config is not a mapping, it will be skipped at collection time"
            );
        }
    }
    Ok(())
}

/// Load instrument declarations from every `.yaml`/`.yml` file in a
/// directory, in file name order.
pub fn load_instruments_from_dir(dir_path: &str) -> Result<Vec<InstrumentEntry>, ConfigError> {
    let dir = Path::new(dir_path);
    if !dir.is_dir() {
        return Err(ConfigError::ValidationError(format!(
            "instrument_path '{}' is not a directory",
            dir_path
        )));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if path.is_file() && (ext == "yaml" || ext == "yml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut merged = Vec::new();
    for path in paths {
        tracing::debug!(path = %path.display(), "Loading instrument config");
        let content = super::expand_env_vars(&std::fs::read_to_string(&path)?);
        let file: InstrumentsFile = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
        })?;
        merged.extend(file.instruments);
    }
    Ok(merged)
}
