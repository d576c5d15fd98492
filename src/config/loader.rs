//! Configuration loader with tier-based merging.
//!
//! Loads configuration from multiple tiers and merges them field-by-field.

use super::merge::deep_merge_all;
use super::types::Config;
use anyhow::{Result, anyhow};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    /// Embedded defaults (lowest priority)
    Defaults = 0,
    /// Project-level config ($CWD/taskboard/)
    Project = 1,
    /// User-level config (~/.taskboard/)
    User = 2,
    /// Environment variables (highest priority)
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Paths for each configuration tier.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Project-level config directory
    pub project_dir: Option<PathBuf>,
    /// User-level config directory
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths: `./taskboard` and `~/.taskboard`.
    pub fn discover() -> Self {
        Self {
            project_dir: Some(PathBuf::from("taskboard")),
            user_dir: dirs::home_dir().map(|h| h.join(".taskboard")),
        }
    }

    /// Create paths with explicit directories.
    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }
}

/// Read one tier's `config.yaml`, if present. Unreadable or invalid files are skipped.
fn read_tier(dir: Option<&Path>, tier: ConfigTier) -> Option<(Value, PathBuf)> {
    let config_file = dir?.join("config.yaml");
    if !config_file.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(&config_file) {
        Ok(content) => content,
        Err(e) => {
            warn!("Skipping {} config {}: {}", tier, config_file.display(), e);
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => {
            debug!("Loaded {} config from {}", tier, config_file.display());
            Some((value, config_file))
        }
        Err(e) => {
            warn!("Skipping {} config {}: {}", tier, config_file.display(), e);
            None
        }
    }
}

/// Configuration loader that handles tier-based merging.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Paths for each tier
    pub paths: ConfigPaths,
    /// Loaded configuration
    config: Config,
    /// Highest-tier config file that was used (if any)
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers with proper merging.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(ConfigPaths::discover())
    }

    /// Load configuration from an explicit file, skipping the file tiers.
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut config = Config::load(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(Self {
            paths: ConfigPaths::with_dirs(None, None),
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Load configuration with explicit paths.
    pub fn load_with_paths(paths: ConfigPaths) -> Result<Self> {
        // Explicit config path override
        if let Ok(explicit_path) = std::env::var("TASKBOARD_CONFIG_PATH") {
            let mut loader = Self::load_file(Path::new(&explicit_path))?;
            loader.paths = paths;
            return Ok(loader);
        }

        let mut configs: Vec<Value> = Vec::new();
        let mut config_path = None;

        // Tier 1: Defaults (embedded)
        configs.push(serde_json::to_value(Config::default())?);

        // Tier 2: Project config
        if let Some((value, path)) = read_tier(paths.project_dir.as_deref(), ConfigTier::Project) {
            configs.push(value);
            config_path = Some(path);
        }

        // Tier 3: User config
        if let Some((value, path)) = read_tier(paths.user_dir.as_deref(), ConfigTier::User) {
            configs.push(value);
            config_path = Some(path);
        }

        let merged = deep_merge_all(configs);
        let mut config: Config = serde_json::from_value(merged)?;

        // Tier 4: Environment variable overrides
        Self::apply_env_overrides(&mut config)?;

        Ok(Self {
            paths,
            config,
            config_path,
        })
    }

    /// Apply environment variable overrides to config.
    fn apply_env_overrides(config: &mut Config) -> Result<()> {
        if let Ok(db_path) = std::env::var("TASKBOARD_DB_PATH") {
            config.server.db_path = PathBuf::from(db_path);
        }

        if let Ok(host) = std::env::var("TASKBOARD_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("TASKBOARD_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| anyhow!("TASKBOARD_PORT is not a valid port: {}", port))?;
        }

        if let Ok(base_url) = std::env::var("TASKBOARD_BASE_URL") {
            config.server.base_url = base_url;
        }

        if let Ok(client_id) = std::env::var("GOOGLE_CLIENT_ID") {
            config.google.client_id = client_id;
        }

        if let Ok(client_secret) = std::env::var("GOOGLE_CLIENT_SECRET") {
            config.google.client_secret = client_secret;
        }

        if let Ok(redirect_uri) = std::env::var("GOOGLE_REDIRECT_URI") {
            config.google.redirect_uri = redirect_uri;
        }

        Ok(())
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Get the config file path that was used.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_paths_discover() {
        let paths = ConfigPaths::discover();
        assert_eq!(paths.project_dir, Some(PathBuf::from("taskboard")));
    }

    #[test]
    fn test_load_defaults_only() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(
            Some(temp.path().join("project")),
            Some(temp.path().join("user")),
        );

        let loader = ConfigLoader::load_with_paths(paths).unwrap();
        assert_eq!(loader.config().tasks.page_size, 10);
        assert_eq!(loader.config().auth.min_password_length, 8);
        assert!(loader.config_path().is_none());
    }

    #[test]
    fn test_user_config_overrides_project() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("taskboard");
        let user_dir = temp.path().join("user");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::create_dir_all(&user_dir).unwrap();

        let project_config = r#"
tasks:
  page_size: 25
auth:
  min_password_length: 12
"#;
        std::fs::write(project_dir.join("config.yaml"), project_config).unwrap();

        let user_config = r#"
tasks:
  page_size: 50
"#;
        std::fs::write(user_dir.join("config.yaml"), user_config).unwrap();

        let paths = ConfigPaths::with_dirs(Some(project_dir), Some(user_dir.clone()));
        let loader = ConfigLoader::load_with_paths(paths).unwrap();
        let config = loader.config();

        assert_eq!(config.tasks.page_size, 50);
        assert_eq!(config.auth.min_password_length, 12);
        assert_eq!(loader.config_path(), Some(user_dir.join("config.yaml").as_path()));
    }

    #[test]
    fn test_invalid_yaml_tier_is_skipped() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("taskboard");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("config.yaml"), "server: [unclosed").unwrap();

        let paths = ConfigPaths::with_dirs(Some(project_dir), None);
        let loader = ConfigLoader::load_with_paths(paths).unwrap();
        assert_eq!(loader.config().server.port, crate::config::DEFAULT_PORT);
    }
}
