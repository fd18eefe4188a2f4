use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::extractor::{DEFAULT_PROGRAM, YtDlp};

pub const DEFAULT_CONFIG_PATH: &str = "ytdlp-wrapper.env";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_DB_PATH: &str = "db/downloads.db";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub downloads_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub downloads_dir: PathBuf,
    pub db_path: PathBuf,
    pub ytdlp_bin: PathBuf,
    pub cookies_file: Option<PathBuf>,
}

impl RuntimePaths {
    /// Creates the downloads directory and the database's parent directory.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.downloads_dir)
            .with_context(|| format!("Creating {}", self.downloads_dir.display()))?;
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
        }
        Ok(())
    }

    pub fn tool(&self) -> YtDlp {
        YtDlp::new(self.ytdlp_bin.clone(), self.cookies_file.clone())
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "DOWNLOADS_DIR" => cfg.downloads_dir = Some(PathBuf::from(value)),
                "DB_PATH" => cfg.db_path = Some(PathBuf::from(value)),
                "YTDLP_BIN" => cfg.ytdlp_bin = Some(PathBuf::from(value)),
                "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Resolves paths from the env file at `path`, relative defaults anchored at
/// the current directory. A missing file means all defaults.
pub fn load_runtime_paths(path: impl AsRef<Path>) -> Result<RuntimePaths> {
    let cwd = env::current_dir().context("Resolving current directory")?;
    load_runtime_paths_from(path, &cwd)
}

pub fn load_runtime_paths_from(path: impl AsRef<Path>, base_dir: &Path) -> Result<RuntimePaths> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(RuntimePaths {
        downloads_dir: cfg
            .downloads_dir
            .unwrap_or_else(|| base_dir.join(DEFAULT_DOWNLOADS_DIR)),
        db_path: cfg.db_path.unwrap_or_else(|| base_dir.join(DEFAULT_DB_PATH)),
        ytdlp_bin: cfg.ytdlp_bin.unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM)),
        cookies_file: cfg.cookies_file,
    })
}
