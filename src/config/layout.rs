//! Absolute host paths derived from the configuration.
//!
//! Every file the orchestrator reads or writes on the target host is named
//! here, so phases never build paths by hand.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::spec::DeployConfig;

/// Default append-only log file.
pub const DEFAULT_LOG_FILE: &str = "/var/log/almadeploy.log";

/// PostgreSQL data directory used by the distribution packages.
pub const PG_DATA_DIR: &str = "/var/lib/pgsql/data";

/// Group Nginx runs as on AlmaLinux.
pub const NGINX_GROUP: &str = "nginx";

/// Paths and unit names derived from a [`DeployConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostLayout {
    /// Application name.
    pub app_name: String,
    /// Service account and group name.
    pub service_user: String,
    /// Root of the deployment-owned tree.
    pub deploy_root: PathBuf,
    /// Working copy of the backend sources.
    pub backend_work_dir: PathBuf,
    /// Working copy of the frontend sources.
    pub frontend_work_dir: PathBuf,
    /// Digest of the backend working copy the current jar was built from.
    pub backend_stamp: PathBuf,
    /// Digest of the frontend working copy the current bundle was built from.
    pub frontend_stamp: PathBuf,
    /// Directory holding the deployed jar.
    pub app_dir: PathBuf,
    /// Deployed backend jar.
    pub jar_path: PathBuf,
    /// Directory served by Nginx.
    pub web_root: PathBuf,
    /// Directory holding the environment file.
    pub env_dir: PathBuf,
    /// Environment file read by the unit.
    pub env_file: PathBuf,
    /// Systemd unit name.
    pub unit_name: String,
    /// Systemd unit file.
    pub unit_file: PathBuf,
    /// Nginx vhost file.
    pub nginx_conf: PathBuf,
    /// Managed directory for caller-supplied TLS material.
    pub tls_dir: PathBuf,
    /// Full chain installed from caller material.
    pub tls_fullchain: PathBuf,
    /// Private key installed from caller material.
    pub tls_key: PathBuf,
    /// Let's Encrypt live directory for the domain.
    pub letsencrypt_live: PathBuf,
    /// Deploy hook reloading Nginx after renewal.
    pub renewal_hook: PathBuf,
    /// PostgreSQL data directory.
    pub pg_data_dir: PathBuf,
    /// Append-only log file.
    pub log_file: PathBuf,
}

impl HostLayout {
    /// Derives the layout from a configuration.
    #[must_use]
    pub fn from_config(config: &DeployConfig) -> Self {
        let app = config.app_name().to_string();
        let deploy_root = config
            .paths
            .deploy_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/opt/{app}")));
        let web_root = config
            .paths
            .web_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/var/www/{app}")));
        let env_dir = PathBuf::from(format!("/etc/{app}"));
        let tls_dir = PathBuf::from(format!("/etc/pki/{app}"));
        let app_dir = deploy_root.join("app");

        Self {
            service_user: app.clone(),
            backend_work_dir: deploy_root.join("src").join("backend"),
            frontend_work_dir: deploy_root.join("src").join("frontend"),
            backend_stamp: deploy_root.join("src").join(".backend.sha256"),
            frontend_stamp: deploy_root.join("src").join(".frontend.sha256"),
            jar_path: app_dir.join(format!("{app}.jar")),
            app_dir,
            web_root,
            env_file: env_dir.join(format!("{app}.env")),
            env_dir,
            unit_name: format!("{app}.service"),
            unit_file: PathBuf::from(format!("/etc/systemd/system/{app}.service")),
            nginx_conf: PathBuf::from(format!("/etc/nginx/conf.d/{app}.conf")),
            tls_fullchain: tls_dir.join("fullchain.pem"),
            tls_key: tls_dir.join("privkey.pem"),
            tls_dir,
            letsencrypt_live: PathBuf::from(format!("/etc/letsencrypt/live/{}", config.domain)),
            renewal_hook: PathBuf::from("/etc/letsencrypt/renewal-hooks/deploy/reload-nginx.sh"),
            pg_data_dir: PathBuf::from(PG_DATA_DIR),
            log_file: config
                .paths
                .log_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            deploy_root,
            app_name: app,
        }
    }

    /// Certificate and key Nginx should use, given where TLS comes from.
    #[must_use]
    pub fn tls_material(&self, supplied: bool) -> (PathBuf, PathBuf) {
        if supplied {
            (self.tls_fullchain.clone(), self.tls_key.clone())
        } else {
            (
                self.letsencrypt_live.join("fullchain.pem"),
                self.letsencrypt_live.join("privkey.pem"),
            )
        }
    }

    /// `pg_hba.conf` inside the data directory.
    #[must_use]
    pub fn pg_hba(&self) -> PathBuf {
        self.pg_data_dir.join("pg_hba.conf")
    }

    /// `postgresql.conf` inside the data directory.
    #[must_use]
    pub fn pg_conf(&self) -> PathBuf {
        self.pg_data_dir.join("postgresql.conf")
    }

    /// Marker file present once the cluster is initialized.
    #[must_use]
    pub fn pg_version_marker(&self) -> PathBuf {
        self.pg_data_dir.join("PG_VERSION")
    }

    /// Directory whose filesystem must have free space for the deployment.
    ///
    /// Walks up from the deploy root to the first existing ancestor.
    #[must_use]
    pub fn disk_probe_path(&self) -> &Path {
        let mut current = self.deploy_root.as_path();
        while !current.exists() {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }
}
