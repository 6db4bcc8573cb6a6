use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::policy::MATCH_THRESHOLD;
use facematch_vision::{DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", "facematch"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEMATCH_CONFIG_PATH") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facematch.toml")),
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEMATCH_DATA_DIR") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("facematch-data")),
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Match when the nearest distance is strictly below this.
    pub threshold: f32,
    pub store_dir: PathBuf,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Minimum detector confidence.
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        let models = DATA_DIR.join("models");
        Self {
            threshold: MATCH_THRESHOLD,
            store_dir: DATA_DIR.join("store"),
            detector_model: models.join(DETECTOR_MODEL_FILE),
            recognizer_model: models.join(RECOGNIZER_MODEL_FILE),
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config dir {}", parent.display()))?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

/// Write `cfg` to `path` unless a file is already there. Returns the path.
pub fn ensure_config(cfg: &Config, path: Option<&Path>) -> Result<PathBuf> {
    let path = path.unwrap_or(&CONFIG_PATH).to_path_buf();
    if !path.exists() {
        save_config(cfg, Some(path.as_path()))?;
    }
    Ok(path)
}
