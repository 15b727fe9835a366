//! Configuration module for the provisioning orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `almadeploy.yaml` and layering environment and CLI values
//! - Validation of configuration values
//! - Deriving absolute host paths
//! - Computing configuration and content hashes

mod spec;
mod parser;
mod validator;
mod hash;
mod layout;

pub use spec::{
    AppConfig, DEFAULT_APP_NAME, DatabaseConfig, DeployConfig, FirewallConfig, HealthCheckConfig,
    PackagesConfig, PathsConfig, PreflightConfig, SourcesConfig, TlsConfig,
};
pub use parser::{ConfigOverrides, ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
pub use layout::{DEFAULT_LOG_FILE, HostLayout, NGINX_GROUP, PG_DATA_DIR};
