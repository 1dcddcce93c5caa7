//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::{GopaError, GopaResult};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_HOME: &str = "GOPA_HOME";
pub const ENV_BASE_URL: &str = "GOPA_BASE_URL";
pub const ENV_TOOLCHAIN: &str = "GOPA_TOOLCHAIN";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration the way the command-line shell does.
    ///
    /// An explicit path must exist. Without one, `<home>/config.yaml` is read
    /// when present and defaults are used otherwise.
    pub async fn load(explicit: Option<&Path>) -> GopaResult<GopaConfig> {
        match explicit {
            Some(path) => Self::from_file(path).await,
            None => {
                let home = env_home().unwrap_or_else(|| GopaConfig::default().home);
                let candidate = DataDir::new(home.clone()).config_file();
                if fs::try_exists(&candidate).await.unwrap_or(false) {
                    log::debug!("Loading configuration from {}", candidate.display());
                    Self::from_file(&candidate).await
                } else {
                    Self::finish(GopaConfig::with_home(home))
                }
            }
        }
    }

    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> GopaResult<GopaConfig> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| GopaError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> GopaResult<GopaConfig> {
        let config: GopaConfig = if content.trim().is_empty() {
            GopaConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| GopaError::Config {
                message: format!("Failed to parse YAML config: {}", e),
            })?
        };

        Self::finish(config)
    }

    fn finish(mut config: GopaConfig) -> GopaResult<GopaConfig> {
        Self::resolve_environment(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Environment variables win over file values
    fn resolve_environment(config: &mut GopaConfig) {
        if let Some(home) = env_home() {
            config.home = home;
        }
        if let Some(base_url) = env_value(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(name) = env_value(ENV_TOOLCHAIN) {
            config.toolchain_name = name;
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_home() -> Option<PathBuf> {
    env_value(ENV_HOME).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EntryPolicy;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        env::remove_var(ENV_HOME);
        env::remove_var(ENV_BASE_URL);
        env::remove_var(ENV_TOOLCHAIN);
    }

    #[test]
    #[serial]
    fn test_load_basic_config() {
        clear_env();
        let yaml_content = r#"
home: "/srv/gopa"
base_url: "https://mirror.example.com/"
http_timeout_secs: 30
entry_policy: skip
"#;

        let config = ConfigLoader::from_str(yaml_content).unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/gopa"));
        assert_eq!(config.base_url(), "https://mirror.example.com");
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.entry_policy, EntryPolicy::Skip);
        assert_eq!(config.toolchain_name, "go");
        assert_eq!(config.run_command, "run");
    }

    #[test]
    #[serial]
    fn test_empty_config_uses_defaults() {
        clear_env();
        let config = ConfigLoader::from_str("").unwrap();
        assert_eq!(config, GopaConfig::default());
        assert_eq!(config.entry_policy, EntryPolicy::Reject);
        assert!(config.home.ends_with(DEFAULT_HOME_DIRNAME));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        clear_env();
        env::set_var(ENV_HOME, "/tmp/gopa-env");
        env::set_var(ENV_BASE_URL, "http://127.0.0.1:9999");
        env::set_var(ENV_TOOLCHAIN, "tinygo");

        let config = ConfigLoader::from_str("home: /elsewhere\n").unwrap();
        clear_env();

        assert_eq!(config.home, PathBuf::from("/tmp/gopa-env"));
        assert_eq!(config.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.toolchain_name, "tinygo");
    }

    #[test]
    #[serial]
    fn test_invalid_config_is_rejected() {
        clear_env();
        assert!(matches!(
            ConfigLoader::from_str("base_url: ftp://go.dev\n"),
            Err(GopaError::Config { .. })
        ));
        assert!(matches!(
            ConfigLoader::from_str("http_timeout_secs: 0\n"),
            Err(GopaError::Config { .. })
        ));
        assert!(matches!(
            ConfigLoader::from_str("entry_policy: follow\n"),
            Err(GopaError::Config { .. })
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_load_from_file() {
        clear_env();
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"toolchain_name: go\nuser_agent: test-agent\n").unwrap();

        let config = ConfigLoader::load(Some(temp_file.path())).await.unwrap();
        assert_eq!(config.user_agent, "test-agent");
    }

    #[tokio::test]
    #[serial]
    async fn test_load_finds_config_in_home() {
        clear_env();
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(CONFIG_FILENAME), "http_timeout_secs: 42\n").unwrap();
        env::set_var(ENV_HOME, home.path());

        let config = ConfigLoader::load(None).await;
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.home, home.path());
        assert_eq!(config.http_timeout_secs, 42);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_explicit_file_is_an_error() {
        clear_env();
        let result = ConfigLoader::load(Some(Path::new("/nonexistent/gopa.yaml"))).await;
        assert!(matches!(result, Err(GopaError::Config { .. })));
    }
}
