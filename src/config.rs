use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://hub.vroid.com/api";
pub const DEFAULT_API_VERSION: &str = "11";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Hub endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub api_base: String,
    pub api_version: String,
    pub user_agent: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Persisted run settings used by the CLI. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeobOptions {
    pub hub: HubSettings,
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    pub output_dir: PathBuf,
    /// Debug artifacts are written only when set.
    pub debug_dir: Option<PathBuf>,
}

impl Default for DeobOptions {
    fn default() -> Self {
        Self {
            hub: HubSettings::default(),
            cache_dir: PathBuf::from("cache"),
            use_cache: true,
            output_dir: PathBuf::from("."),
            debug_dir: None,
        }
    }
}

/// Save run settings to a JSON file.
pub fn save_options(path: &Path, options: &DeobOptions) -> Result<()> {
    let content =
        serde_json::to_string_pretty(options).context("failed to serialize options as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save options: {}", path.display()))?;
    Ok(())
}

/// Load run settings from a JSON file.
pub fn load_options(path: &Path) -> Result<DeobOptions> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load options: {}", path.display()))?;
    let options: DeobOptions =
        serde_json::from_str(&content).context("failed to parse options JSON")?;
    Ok(options)
}
