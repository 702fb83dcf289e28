use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Locate the data directory and database path. `CMV_DB` overrides the
    /// database location, which tests and one-off runs rely on.
    pub fn load() -> Result<Self> {
        Self::load_with_override(std::env::var_os("CMV_DB").map(PathBuf::from))
    }

    fn load_with_override(db_override: Option<PathBuf>) -> Result<Self> {
        if let Some(db_path) = db_override {
            let data_dir = db_path
                .parent()
                .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
            if !data_dir.as_os_str().is_empty() {
                std::fs::create_dir_all(&data_dir).with_context(|| {
                    format!("Failed to create data directory: {}", data_dir.display())
                })?;
            }
            return Ok(Config { db_path, data_dir });
        }

        let proj_dirs =
            ProjectDirs::from("", "", "cmv").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("cmv.db");

        Ok(Config { db_path, data_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_override_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("custom.db");

        let config = Config::load_with_override(Some(db_path.clone())).unwrap();

        assert_eq!(config.db_path, db_path);
        assert_eq!(config.data_dir, dir.path().join("nested"));
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_default_location_is_under_data_dir() {
        let config = Config::load_with_override(None).unwrap();
        assert_eq!(config.db_path, config.data_dir.join("cmv.db"));
    }
}
