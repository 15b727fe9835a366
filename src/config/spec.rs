//! Configuration specification types for a deployment.
//!
//! These structs map to the optional `almadeploy.yaml` file and are also
//! filled from CLI flags. Once validated the record is immutable and passed
//! by reference into every phase.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default application name.
pub const DEFAULT_APP_NAME: &str = "webapp";

/// The root configuration record for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DeployConfig {
    /// Target FQDN served by the reverse proxy.
    pub domain: String,
    /// Contact address for the certificate authority.
    pub contact_email: Option<String>,
    /// Application name; used for the service account, unit and paths.
    pub app_name: String,
    /// Database provisioning parameters.
    pub database: DatabaseConfig,
    /// Source trees to build from.
    pub sources: SourcesConfig,
    /// Caller-supplied TLS material.
    pub tls: TlsConfig,
    /// Runtime settings of the backend process.
    pub app: AppConfig,
    /// Post-deploy health probe.
    pub health: HealthCheckConfig,
    /// Firewall allow-list.
    pub firewall: FirewallConfig,
    /// Runtime dependencies.
    pub packages: PackagesConfig,
    /// Path overrides.
    pub paths: PathsConfig,
    /// Pre-flight thresholds.
    pub preflight: PreflightConfig,
}

/// Database role and schema to provision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database name.
    pub name: String,
    /// Owning role.
    pub user: String,
    /// Role password.
    pub password: String,
}

/// Source directories for the backend and frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourcesConfig {
    /// Java backend project (Maven).
    pub backend: PathBuf,
    /// JavaScript frontend project (npm).
    pub frontend: PathBuf,
    /// Directory names never copied into, nor deleted from, the working copy.
    pub exclude: Vec<String>,
}

/// TLS material supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate (PEM).
    pub cert_path: Option<PathBuf>,
    /// Private key (PEM).
    pub key_path: Option<PathBuf>,
    /// Intermediate chain (PEM).
    pub chain_path: Option<PathBuf>,
}

/// Backend runtime settings rendered into the systemd unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Port the backend listens on (loopback only).
    pub port: u16,
    /// URL prefix proxied to the backend.
    pub api_prefix: String,
    /// JVM options.
    pub java_opts: String,
    /// Seconds systemd waits before restarting a failed unit.
    pub restart_sec: u32,
    /// `LimitNOFILE` for the unit.
    pub limit_nofile: u32,
    /// `MemoryMax` for the unit (systemd size syntax).
    pub memory_max: String,
}

/// Health probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path of the health endpoint on the backend.
    pub path: String,
    /// Number of probe attempts.
    pub attempts: u32,
    /// Seconds between attempts.
    pub interval_secs: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Firewall allow-list (firewalld service names).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FirewallConfig {
    /// Services that must be allowed; everything else is removed.
    pub services: Vec<String>,
}

/// Packages that must be installed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackagesConfig {
    /// RPM package names.
    pub required: Vec<String>,
}

/// Path overrides; unset values are derived from the app name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the deployment-owned tree (default `/opt/<app>`).
    pub deploy_root: Option<PathBuf>,
    /// Directory served by Nginx (default `/var/www/<app>`).
    pub web_root: Option<PathBuf>,
    /// Append-only log file (default `/var/log/almadeploy.log`).
    pub log_file: Option<PathBuf>,
}

/// Pre-flight thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreflightConfig {
    /// Minimum free space on the deploy filesystem, in GiB.
    pub min_free_gib: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            backend: PathBuf::new(),
            frontend: PathBuf::new(),
            exclude: [".git", "target", "node_modules", "dist", "build"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_prefix: String::from("/api/"),
            java_opts: String::from("-Xms256m -Xmx512m"),
            restart_sec: 10,
            limit_nofile: 65536,
            memory_max: String::from("1G"),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: String::from("/api/health"),
            attempts: 30,
            interval_secs: 2,
            timeout_secs: 5,
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            services: vec![
                String::from("ssh"),
                String::from("http"),
                String::from("https"),
            ],
        }
    }
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            required: [
                "firewalld",
                "java-17-openjdk-devel",
                "maven",
                "nodejs",
                "npm",
                "postgresql-server",
                "postgresql-contrib",
                "nginx",
                "certbot",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self { min_free_gib: 2 }
    }
}

impl DeployConfig {
    /// Returns the application name, falling back to the default.
    #[must_use]
    pub fn app_name(&self) -> &str {
        if self.app_name.is_empty() {
            DEFAULT_APP_NAME
        } else {
            &self.app_name
        }
    }

    /// Returns true if the caller supplied a certificate and key.
    #[must_use]
    pub const fn has_supplied_tls(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    /// Returns the ports the deployment needs to own.
    #[must_use]
    pub fn required_ports(&self) -> [u16; 3] {
        [80, 443, self.app.port]
    }
}

impl PreflightConfig {
    /// Minimum free space in bytes.
    #[must_use]
    pub const fn min_free_bytes(&self) -> u64 {
        self.min_free_gib.saturating_mul(1024 * 1024 * 1024)
    }
}
