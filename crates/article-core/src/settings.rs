//! Engine settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/digital-article/settings.json
//! - Linux: ~/.config/digital-article/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\digital-article\settings.json

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::diff::DiffAlgorithm;
use crate::retry::{DEFAULT_RETRY_CAP, MAX_RETRY_CAP};
use crate::variables::DEFAULT_PREVIEW_CHAR_LIMIT;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EngineSettings {
    /// Maximum automatic repair attempts per execution (1-10)
    #[serde(default = "default_retry_cap", deserialize_with = "deserialize_retry_cap")]
    #[schemars(with = "u32", range(min = 1, max = 10))]
    pub retry_cap: u32,

    /// Whether executions started by the engine itself (downstream re-runs)
    /// repair failures automatically
    #[serde(default = "default_true")]
    pub autofix: bool,

    /// Diff algorithm for the code editor
    #[serde(default)]
    pub diff_algorithm: DiffAlgorithm,

    /// Stop a re-run-all chain at the first cell that ends in error
    #[serde(default)]
    pub stop_rerun_on_error: bool,

    /// Character limit for scalar and string variable previews
    #[serde(default = "default_preview_char_limit")]
    pub preview_char_limit: usize,
}

fn default_retry_cap() -> u32 {
    DEFAULT_RETRY_CAP
}

fn default_true() -> bool {
    true
}

fn default_preview_char_limit() -> usize {
    DEFAULT_PREVIEW_CHAR_LIMIT
}

/// Deserialize a retry cap that accepts both:
/// - Number: `3`
/// - Numeric string: `"3"` (hand-edited files)
fn deserialize_retry_cap<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct RetryCapVisitor;

    impl<'de> de::Visitor<'de> for RetryCapVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a non-negative integer or numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("retry cap out of range: {v}")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("retry cap out of range: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<u32, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid retry cap: {v:?}")))
        }
    }

    deserializer.deserialize_any(RetryCapVisitor)
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_cap: DEFAULT_RETRY_CAP,
            autofix: true,
            diff_algorithm: DiffAlgorithm::Positional,
            stop_rerun_on_error: false,
            preview_char_limit: DEFAULT_PREVIEW_CHAR_LIMIT,
        }
    }
}

impl EngineSettings {
    /// Retry cap clamped to the supported range.
    pub fn effective_retry_cap(&self) -> u32 {
        self.retry_cap.clamp(1, MAX_RETRY_CAP)
    }

    /// Load from `path`, returning defaults if the file is missing or
    /// unreadable.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "[settings] Ignoring unreadable settings at {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("[settings] Saved settings to {}", path.display());
        Ok(())
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(crate::APP_DIR_NAME)
        .join("settings.json")
}

/// Load settings from disk, returning defaults if file doesn't exist
pub fn load_settings() -> EngineSettings {
    EngineSettings::load_from(&settings_path())
}

/// Save settings to disk
pub fn save_settings(settings: &EngineSettings) -> Result<()> {
    settings.save_to(&settings_path())
}

/// JSON Schema for the settings file, pretty-printed.
pub fn settings_schema() -> Result<String> {
    let schema = schemars::schema_for!(EngineSettings);
    Ok(serde_json::to_string_pretty(&schema)?)
}
