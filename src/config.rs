//! Configuration for plancontrol.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PLANCONTROL_HOME, PLANCONTROL_DB)
//! 2. Config file (.plancontrol/config.yaml)
//! 3. Defaults (~/.plancontrol, ~/.plancontrol/executions.db)
//!
//! Config file discovery:
//! - Searches current directory and parents for .plancontrol/config.yaml
//! - Paths in the config file are relative to the .plancontrol/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{StoreRetryPolicy, DEFAULT_CHANNEL};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".plancontrol";
const DATABASE_FILE: &str = "executions.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub store_retry: Option<StoreRetryPolicy>,
    #[serde(default)]
    pub wait_notify: Option<WaitNotifyConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .plancontrol/)
    pub home: Option<String>,
    /// SQLite database file (relative to .plancontrol/)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitNotifyConfig {
    pub channel: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Execution store database
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Bounded retry for transient store failures
    pub store_retry: StoreRetryPolicy,
    /// Wait/notify channel for fan-in waits
    pub channel: String,
}

/// Environment overrides
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    database: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("PLANCONTROL_HOME").ok(),
            database: std::env::var("PLANCONTROL_DB").ok(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge the three sources
fn resolve(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: EnvOverrides,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), Some(config)),
        None => (None, None),
    };

    // Paths in the file are relative to .plancontrol/
    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let paths = config.as_ref().map(|c| c.paths.clone()).unwrap_or_default();

    let home = match (env.home, paths.home) {
        (Some(env_home), _) => PathBuf::from(env_home),
        (None, Some(home)) => resolve_path(base_dir, &home),
        (None, None) => default_home,
    };

    let database = match (env.database, paths.database) {
        (Some(env_db), _) => PathBuf::from(env_db),
        (None, Some(db)) => resolve_path(base_dir, &db),
        (None, None) => home.join(DATABASE_FILE),
    };

    let store_retry = config
        .as_ref()
        .and_then(|c| c.store_retry.clone())
        .unwrap_or_default();

    let channel = config
        .and_then(|c| c.wait_notify)
        .and_then(|w| w.channel)
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

    ResolvedConfig {
        home,
        database,
        config_file,
        store_retry,
        channel,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(resolve(default_home, file, EnvOverrides::from_env()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the plancontrol home directory
pub fn plancontrol_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the execution store database path
pub fn database_path() -> Result<PathBuf> {
    Ok(config()?.database.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let config_dir = dir.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve(PathBuf::from("/home/u/.plancontrol"), None, EnvOverrides::default());

        assert_eq!(config.home, PathBuf::from("/home/u/.plancontrol"));
        assert_eq!(config.database, PathBuf::from("/home/u/.plancontrol/executions.db"));
        assert!(config.config_file.is_none());
        assert_eq!(config.store_retry.max_attempts, 3);
        assert_eq!(config.channel, "orchestration");
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            temp.path(),
            r#"
version: "1.0"
paths:
  home: ./state
  database: /var/lib/plancontrol/plans.db
store_retry:
  max_attempts: 5
wait_notify:
  channel: control
"#,
        );

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./state".to_string()));

        let retry = config.store_retry.clone().unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay_ms, 50);

        let resolved = resolve(
            PathBuf::from("/unused"),
            Some((config_path.clone(), config)),
            EnvOverrides::default(),
        );
        assert_eq!(resolved.database, PathBuf::from("/var/lib/plancontrol/plans.db"));
        assert_eq!(resolved.home, config_path.parent().unwrap().join("./state"));
        assert_eq!(resolved.channel, "control");
        assert_eq!(resolved.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(temp.path(), "version: \"1.0\"\npaths:\n  home: ./state\n");
        let config = load_config_file(&config_path).unwrap();

        let resolved = resolve(
            PathBuf::from("/unused"),
            Some((config_path, config)),
            EnvOverrides {
                home: Some("/env/home".to_string()),
                database: None,
            },
        );
        assert_eq!(resolved.home, PathBuf::from("/env/home"));
        assert_eq!(resolved.database, PathBuf::from("/env/home/executions.db"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
