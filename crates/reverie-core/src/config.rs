//! Process configuration and batch file parsing.
//!
//! `Settings` is built exactly once at process start and passed by reference
//! to every component that needs it; no component reads environment state
//! directly. The batch file is the JSON description of one run: algorithm,
//! base parameters, iteration axes, and destination playlist.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::defaults;
use crate::error::{Error, Result};
use crate::job::Algorithm;

/// Process-wide settings resolved from the environment at startup.
///
/// | Variable | Required | Description |
/// |----------|----------|-------------|
/// | `BACKEND_URL` | yes | Playlist backend base URL |
/// | `API_KEY` | yes | Playlist backend api key |
/// | `REDIS_URL` | no | Result store URL (default `redis://localhost:6379`) |
/// | `SUBMIT_COMMAND` | yes | Submission command, whitespace-split into argv |
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: String,
    pub api_key: String,
    pub redis_url: String,
    /// Program and arguments of the out-of-process submission boundary.
    pub submit_command: Vec<String>,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend_url = lookup("BACKEND_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config("BACKEND_URL is not set".to_string()))?;
        let api_key = lookup("API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config("API_KEY is not set".to_string()))?;
        let redis_url =
            lookup("REDIS_URL").unwrap_or_else(|| defaults::REDIS_URL.to_string());

        let submit_command: Vec<String> = lookup("SUBMIT_COMMAND")
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();
        if submit_command.is_empty() {
            return Err(Error::Config("SUBMIT_COMMAND is not set".to_string()));
        }

        Ok(Self {
            backend_url,
            api_key,
            redis_url,
            submit_command,
        })
    }
}

/// Destination playlist for materialized artifacts.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistSpec {
    /// Reuse an existing playlist instead of creating one.
    #[serde(default)]
    pub existing_uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

/// One batch run, parsed from a JSON batch file.
///
/// Typed fields cover the iteration axes and run controls; the raw document
/// is retained as the base parameter object for descriptor building (the
/// per-algorithm allow-list filters it).
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub algorithm: Algorithm,
    /// Base prompt, composed with each combo suffix.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Directory of source assets (image-to-video batches).
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    /// Prompt variation suffixes; empty means a single unmodified iteration.
    #[serde(default)]
    pub combos: Vec<String>,
    /// Iteration count for batches without a source-asset axis.
    #[serde(default = "default_num_generations")]
    pub num_generations: u32,
    /// Source references for upscale batches (clip uuids or video URLs).
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub playlist: Option<PlaylistSpec>,
    /// Local directory for materialized artifacts when no playlist is
    /// configured.
    #[serde(default)]
    pub output_folder: Option<PathBuf>,
    /// Per-batch override of the poll-phase wall-clock deadline.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Per-batch override of the poll interval.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Raw batch document; source of allow-listed base parameters.
    #[serde(skip)]
    pub base: JsonValue,
}

fn default_num_generations() -> u32 {
    1
}

impl BatchConfig {
    /// Parse a batch file's contents.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: JsonValue = serde_json::from_str(text)?;
        let mut config: BatchConfig = serde_json::from_value(raw.clone())?;
        config.base = raw;
        Ok(config)
    }

    /// Load and parse a batch file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read batch file {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Combos to iterate; an empty list means one pass with no suffix.
    pub fn effective_combos(&self) -> Vec<String> {
        if self.combos.is_empty() {
            vec![String::new()]
        } else {
            self.combos.clone()
        }
    }
}

/// Scan a directory for source assets (png/jpg/jpeg/webp), sorted by name.
pub fn scan_assets(dir: &Path) -> Result<Vec<PathBuf>> {
    const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "image_path is not a directory: {}",
            dir.display()
        )));
    }

    let mut assets: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect();

    if assets.is_empty() {
        return Err(Error::Config(format!(
            "no image files found in {}",
            dir.display()
        )));
    }

    assets.sort();
    Ok(assets)
}
