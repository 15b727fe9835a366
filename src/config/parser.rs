//! Configuration parser for loading and merging configuration sources.
//!
//! Sources are layered with the precedence CLI flag > environment > YAML
//! file > built-in default. The YAML file is optional.

use crate::error::{ConfigError, DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Values supplied on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Target FQDN.
    pub domain: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// Database name.
    pub db_name: Option<String>,
    /// Database role.
    pub db_user: Option<String>,
    /// Database role password.
    pub db_password: Option<String>,
    /// Backend source directory.
    pub backend_src: Option<PathBuf>,
    /// Frontend source directory.
    pub frontend_src: Option<PathBuf>,
    /// Application name.
    pub app_name: Option<String>,
    /// TLS certificate.
    pub tls_cert_path: Option<PathBuf>,
    /// TLS private key.
    pub tls_key_path: Option<PathBuf>,
    /// TLS intermediate chain.
    pub tls_chain_path: Option<PathBuf>,
    /// Log file.
    pub log_file: Option<PathBuf>,
}

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory searched for `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(DeployConfig::default());
        }

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration for domain: {}", config.domain);
        Ok(config)
    }

    /// Builds the effective configuration from every layer.
    ///
    /// `file` is the explicit config path; when absent the file is searched
    /// upward from `search_from` and skipped if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any file is invalid.
    pub fn resolve(
        &self,
        file: Option<&Path>,
        search_from: &Path,
        overrides: &ConfigOverrides,
    ) -> Result<DeployConfig> {
        let mut config = match file {
            Some(path) => self.load_file(path)?,
            None => match find_config_file(search_from) {
                Some(path) => self.load_file(path)?,
                None => {
                    debug!("No configuration file found; using defaults");
                    DeployConfig::default()
                }
            },
        };

        Self::apply_env_overrides(&mut config);
        Self::apply_overrides(&mut config, overrides);
        Ok(config)
    }

    /// Applies `ALMADEPLOY_*` environment variables.
    fn apply_env_overrides(config: &mut DeployConfig) {
        if let Some(domain) = env_value("ALMADEPLOY_DOMAIN") {
            debug!("Overriding domain from environment");
            config.domain = domain;
        }
        if let Some(email) = env_value("ALMADEPLOY_EMAIL") {
            debug!("Overriding contact_email from environment");
            config.contact_email = Some(email);
        }
        if let Some(app) = env_value("ALMADEPLOY_APP_NAME") {
            debug!("Overriding app_name from environment");
            config.app_name = app;
        }
        if let Some(name) = env_value("ALMADEPLOY_DB_NAME") {
            debug!("Overriding database.name from environment");
            config.database.name = name;
        }
        if let Some(user) = env_value("ALMADEPLOY_DB_USER") {
            debug!("Overriding database.user from environment");
            config.database.user = user;
        }
        if let Some(password) = env_value("ALMADEPLOY_DB_PASSWORD") {
            debug!("Overriding database.password from environment");
            config.database.password = password;
        }
    }

    /// Applies command-line values on top of everything else.
    pub fn apply_overrides(config: &mut DeployConfig, overrides: &ConfigOverrides) {
        if let Some(domain) = &overrides.domain {
            config.domain.clone_from(domain);
        }
        if let Some(email) = &overrides.email {
            config.contact_email = Some(email.clone());
        }
        if let Some(name) = &overrides.db_name {
            config.database.name.clone_from(name);
        }
        if let Some(user) = &overrides.db_user {
            config.database.user.clone_from(user);
        }
        if let Some(password) = &overrides.db_password {
            config.database.password.clone_from(password);
        }
        if let Some(path) = &overrides.backend_src {
            config.sources.backend.clone_from(path);
        }
        if let Some(path) = &overrides.frontend_src {
            config.sources.frontend.clone_from(path);
        }
        if let Some(app) = &overrides.app_name {
            config.app_name.clone_from(app);
        }
        if let Some(path) = &overrides.tls_cert_path {
            config.tls.cert_path = Some(path.clone());
        }
        if let Some(path) = &overrides.tls_key_path {
            config.tls.key_path = Some(path.clone());
        }
        if let Some(path) = &overrides.tls_chain_path {
            config.tls.chain_path = Some(path.clone());
        }
        if let Some(path) = &overrides.log_file {
            config.paths.log_file = Some(path.clone());
        }
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Reads a non-empty environment variable.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["almadeploy.yaml", "almadeploy.yml"];

/// Finds the configuration file in the given directory or its parents.
#[must_use]
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.is_file() {
                info!("Found configuration file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}
