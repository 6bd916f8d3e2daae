//! Configuration loading from TOML files and the environment

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for sosdb
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub s2: S2Config,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory`, `duckdb://<path>` or a path. Defaults to
    /// `<data_root>/<name>.duckdb`.
    #[serde(deserialize_with = "deserialize_env_var")]
    pub uri: Option<String>,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: None,
            name: "papersDB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub large_object_collections: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            large_object_collections: vec!["cc_pdf".to_string(), "cc_png".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S2Config {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
}

impl Default for S2Config {
    fn default() -> Self {
        Self {
            api_key: std::env::var("S2_API_KEY").ok(),
        }
    }
}

/// Shared cluster vs local workstation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Cluster,
    Local,
}

impl Environment {
    /// `SOSDB_ENV=cluster|local` wins; otherwise a `/netfiles` mount means
    /// cluster.
    pub fn detect() -> Self {
        match std::env::var("SOSDB_ENV").ok().as_deref() {
            Some("cluster") => Self::Cluster,
            Some("local") => Self::Local,
            _ if Path::new("/netfiles").exists() => Self::Cluster,
            _ => Self::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Local => "local",
        }
    }

    fn default_data_root(self) -> PathBuf {
        match self {
            Self::Cluster => {
                let group =
                    std::env::var("SOSDB_GROUP").unwrap_or_else(|_| "compethicslab".to_string());
                PathBuf::from(format!("/netfiles/{group}/scisci_data"))
            }
            Self::Local => PathBuf::from("./data"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations, then apply environment
    /// overrides.
    ///
    /// Search order:
    /// 1. ./sosdb.toml (current directory)
    /// 2. ~/.config/sosdb/config.toml
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("sosdb.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "sosdb") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default().with_env())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config.with_env())
    }

    /// Environment variables override file values.
    pub fn with_env(mut self) -> Self {
        if let Ok(uri) = std::env::var("SOSDB_URI") {
            self.database.uri = Some(uri);
        }
        if let Ok(name) = std::env::var("SOSDB_DB_NAME") {
            self.database.name = name;
        }
        if let Ok(root) = std::env::var("SOSDB_DATA_PATH") {
            self.paths.data_root = Some(PathBuf::from(root));
        }
        if let Ok(key) = std::env::var("S2_API_KEY") {
            self.s2.api_key = Some(key);
        }
        self
    }

    pub fn data_root(&self, env: Environment) -> PathBuf {
        self.paths
            .data_root
            .clone()
            .unwrap_or_else(|| env.default_data_root())
    }

    pub fn export_dir(&self, env: Environment) -> PathBuf {
        self.paths
            .export_dir
            .clone()
            .unwrap_or_else(|| self.data_root(env).join("exports"))
    }

    pub fn database_uri(&self, env: Environment) -> String {
        match &self.database.uri {
            Some(uri) => uri.clone(),
            None => {
                let file = self.data_root(env).join(format!("{}.duckdb", self.database.name));
                format!("duckdb://{}", file.display())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.database.name, "papersDB");
        assert!(config.database.uri.is_none());
        assert_eq!(
            config.storage.large_object_collections,
            vec!["cc_pdf", "cc_png"]
        );
    }

    #[test]
    fn default_uri_under_data_root() {
        let mut config = Config::default();
        config.paths.data_root = Some(PathBuf::from("/srv/scisci"));
        assert_eq!(
            config.database_uri(Environment::Local),
            "duckdb:///srv/scisci/papersDB.duckdb"
        );
        assert_eq!(
            config.export_dir(Environment::Local),
            PathBuf::from("/srv/scisci/exports")
        );
    }

    #[test]
    fn local_data_root() {
        let config = Config::default();
        assert_eq!(config.data_root(Environment::Local), PathBuf::from("./data"));
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("SOSDB_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${SOSDB_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("SOSDB_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[database]
uri = "memory"
name = "testDB"

[paths]
data_root = "/tmp/scisci"

[storage]
large_object_collections = ["cc_pdf"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.uri.as_deref(), Some("memory"));
        assert_eq!(config.database.name, "testDB");
        assert_eq!(config.paths.data_root, Some(PathBuf::from("/tmp/scisci")));
        assert_eq!(config.storage.large_object_collections, vec!["cc_pdf"]);
        assert_eq!(config.database_uri(Environment::Local), "memory");
    }
}
