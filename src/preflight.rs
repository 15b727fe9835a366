//! Pre-flight checks run before any phase.
//!
//! Every check is a query; nothing here mutates the host. The first failing
//! check aborts the run.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{DeployConfig, HostLayout};
use crate::error::{ConfigError, PrivilegeError, ResourceError, Result};
use crate::host::{DiskSpace, Host, Listener};

/// Process names allowed to hold a required port, by port role.
const PROXY_PROCESS: &str = "nginx";
const BACKEND_PROCESS: &str = "java";

/// What the checks observed.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    /// Effective uid.
    pub uid: u32,
    /// Free space where the deployment goes.
    pub disk: DiskSpace,
    /// Listeners on required ports that belong to this deployment.
    pub recognized_listeners: Vec<Listener>,
}

/// Runs the pre-flight checks against a host.
pub struct Preflight<'a> {
    config: &'a DeployConfig,
    layout: &'a HostLayout,
    host: &'a dyn Host,
}

impl<'a> Preflight<'a> {
    /// Creates the checker.
    #[must_use]
    pub const fn new(config: &'a DeployConfig, layout: &'a HostLayout, host: &'a dyn Host) -> Self {
        Self { config, layout, host }
    }

    /// Runs all checks in order: privilege, paths, disk, ports.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub async fn run(&self) -> Result<PreflightReport> {
        info!("Running pre-flight checks");

        let uid = self.check_privilege().await?;
        self.check_paths().await?;
        let disk = self.check_disk().await?;
        let recognized_listeners = self.check_ports().await?;

        info!(outcome = "success", "Pre-flight checks passed");
        Ok(PreflightReport {
            uid,
            disk,
            recognized_listeners,
        })
    }

    /// The process must run as root.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::NotRoot`] otherwise.
    pub async fn check_privilege(&self) -> Result<u32> {
        let uid = self.host.effective_uid().await;
        if uid != 0 {
            return Err(PrivilegeError::NotRoot {
                operation: String::from("Provisioning the host"),
                uid,
            }
            .into());
        }
        Ok(uid)
    }

    /// Source trees and supplied TLS files must exist and be readable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PathUnavailable`] naming the first missing path.
    pub async fn check_paths(&self) -> Result<()> {
        for path in self.required_paths() {
            if !self.host.is_readable(&path).await? {
                return Err(ConfigError::PathUnavailable { path }.into());
            }
            debug!("Readable: {}", path.display());
        }
        Ok(())
    }

    /// The filesystem holding the deploy root must have enough free space.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InsufficientDisk`] below the threshold.
    pub async fn check_disk(&self) -> Result<DiskSpace> {
        let required = self.config.preflight.min_free_bytes();
        let disk = self.host.available_space(self.layout.disk_probe_path()).await?;

        if disk.available_bytes < required {
            return Err(ResourceError::InsufficientDisk {
                mount: disk.mount,
                available_bytes: disk.available_bytes,
                required_bytes: required,
            }
            .into());
        }

        debug!("{} bytes free on {}", disk.available_bytes, disk.mount);
        Ok(disk)
    }

    /// Ports 80, 443 and the application port must be free or held by this
    /// deployment's own processes.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::PortInUse`] for the first foreign listener.
    pub async fn check_ports(&self) -> Result<Vec<Listener>> {
        let ports = self.config.required_ports();
        let mut recognized = Vec::new();

        for listener in self.host.listeners().await? {
            if !ports.contains(&listener.port) {
                continue;
            }
            if self.is_recognized(&listener) {
                debug!("Port {} held by our own {:?}", listener.port, listener.process);
                recognized.push(listener);
                continue;
            }
            return Err(ResourceError::PortInUse {
                port: listener.port,
                process: listener.process.unwrap_or_else(|| String::from("unknown")),
            }
            .into());
        }

        Ok(recognized)
    }

    fn is_recognized(&self, listener: &Listener) -> bool {
        let expected = if listener.port == self.config.app.port {
            BACKEND_PROCESS
        } else {
            PROXY_PROCESS
        };
        listener.process.as_deref() == Some(expected)
    }

    fn required_paths(&self) -> Vec<PathBuf> {
        let sources = &self.config.sources;
        let tls = &self.config.tls;
        let mut paths = vec![sources.backend.clone(), sources.frontend.clone()];
        paths.extend(
            [&tls.cert_path, &tls.key_path, &tls.chain_path]
                .into_iter()
                .flatten()
                .cloned(),
        );
        paths
    }
}
