//! Compensating actions registered by mutating phases.
//!
//! Compensations are plain values, recorded only for changes made during the
//! current run and replayed in reverse order when a later phase fails.
//! Package installs, accounts, roles and databases never get one.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::host::{FilePerms, Host, ServiceAction};

/// A reversal step for one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Stop a unit this run started.
    StopService {
        /// Unit name.
        unit: String,
    },
    /// Reload a unit whose configuration was restored.
    ReloadService {
        /// Unit name.
        unit: String,
    },
    /// Re-read systemd unit files.
    DaemonReload,
    /// Put a file back the way it was; `None` removes it.
    RestoreFile {
        /// File path.
        path: PathBuf,
        /// Prior contents.
        previous: Option<Vec<u8>>,
        /// Permissions for the restored file.
        perms: FilePerms,
    },
}

impl Compensation {
    /// Restores `path` to `previous`.
    #[must_use]
    pub fn restore(path: &Path, previous: Option<Vec<u8>>, perms: FilePerms) -> Self {
        Self::RestoreFile {
            path: path.to_path_buf(),
            previous,
            perms,
        }
    }

    /// Applies the compensation.
    ///
    /// # Errors
    ///
    /// Returns the host error of the underlying operation.
    pub async fn apply(&self, host: &dyn Host) -> Result<()> {
        match self {
            Self::StopService { unit } => host.service_action(ServiceAction::Stop, unit).await,
            Self::ReloadService { unit } => {
                // Reloading a stopped unit fails; there is nothing to refresh then.
                if host.service_state(unit).await?.active {
                    host.service_action(ServiceAction::Reload, unit).await
                } else {
                    Ok(())
                }
            }
            Self::DaemonReload => host.daemon_reload().await,
            Self::RestoreFile {
                path,
                previous: Some(contents),
                perms,
            } => host.write_file(path, contents, perms).await,
            Self::RestoreFile { path, previous: None, .. } => host.remove_file(path).await,
        }
    }
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopService { unit } => write!(f, "stop {unit}"),
            Self::ReloadService { unit } => write!(f, "reload {unit}"),
            Self::DaemonReload => write!(f, "systemd daemon-reload"),
            Self::RestoreFile { path, previous: Some(_), .. } => {
                write!(f, "restore previous {}", path.display())
            }
            Self::RestoreFile { path, previous: None, .. } => write!(f, "remove {}", path.display()),
        }
    }
}
