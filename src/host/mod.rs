//! Typed access to the target host.
//!
//! Phases never shell out directly. They ask a [`Host`] typed questions
//! ("is this package installed?", "does this role exist?") and request
//! minimal mutations. [`SystemHost`] implements the trait with the
//! AlmaLinux tool chain.

mod command;
mod parse;
mod system;

#[cfg(test)]
pub(crate) mod fake;

pub use command::{CommandOutput, CommandRunner, CommandSpec};
pub use parse::{listener_process, missing_packages, parse_firewall_services, parse_listeners, parse_psql_bool};
pub use system::SystemHost;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// A systemd unit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    /// Enable at boot.
    Enable,
    /// Start now.
    Start,
    /// Restart now.
    Restart,
    /// Stop now.
    Stop,
    /// Reload configuration.
    Reload,
}

impl ServiceAction {
    /// `systemctl` verb.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Start => "start",
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Reload => "reload",
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.verb())
    }
}

/// Observed state of a systemd unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    /// `systemctl is-active` reported `active`.
    pub active: bool,
    /// `systemctl is-enabled` reported `enabled`.
    pub enabled: bool,
}

/// A TCP listener found on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    /// Local port.
    pub port: u16,
    /// Local address as reported by `ss`.
    pub address: String,
    /// Owning process name, when visible.
    pub process: Option<String>,
}

/// Free space on the filesystem holding a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpace {
    /// Mount point of the filesystem.
    pub mount: String,
    /// Bytes available to unprivileged writers.
    pub available_bytes: u64,
}

/// Ownership and mode for a single file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePerms {
    /// Octal permission bits.
    pub mode: u32,
    /// Owning user; `None` leaves ownership unchanged.
    pub owner: Option<String>,
    /// Owning group; `None` leaves ownership unchanged.
    pub group: Option<String>,
}

impl FilePerms {
    /// Root-owned file with the given mode.
    #[must_use]
    pub fn root(mode: u32) -> Self {
        Self {
            mode,
            owner: Some(String::from("root")),
            group: Some(String::from("root")),
        }
    }

    /// Owned by `owner:group` with the given mode.
    #[must_use]
    pub fn owned(mode: u32, owner: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            mode,
            owner: Some(owner.into()),
            group: Some(group.into()),
        }
    }
}

/// Ownership and modes applied recursively to a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreePerms {
    /// Owning user.
    pub owner: String,
    /// Owning group.
    pub group: String,
    /// Mode for directories.
    pub dir_mode: u32,
    /// Mode for regular files.
    pub file_mode: u32,
}

/// Outcome of a tree mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Files copied because they were new or different.
    pub copied: usize,
    /// Files and directories removed from the destination.
    pub removed: usize,
}

impl SyncReport {
    /// Returns true if the destination was modified.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.copied > 0 || self.removed > 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} copied, {} removed", self.copied, self.removed)
    }
}

/// Whether `rel`, relative to a mirrored root, lies under a top-level entry
/// named in `exclude`.
#[must_use]
pub fn is_excluded(rel: &Path, exclude: &[String]) -> bool {
    rel.components()
        .next()
        .is_some_and(|first| exclude.iter().any(|e| first.as_os_str() == OsStr::new(e)))
}

/// A system account to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAccount {
    /// User name; a group of the same name is created with it.
    pub name: String,
    /// Home directory (not created).
    pub home: PathBuf,
    /// Login shell.
    pub shell: String,
}

/// Which half of the application is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Maven project.
    Backend,
    /// npm project.
    Frontend,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Frontend => write!(f, "frontend"),
        }
    }
}

/// A build to run in a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    /// Component being built.
    pub component: Component,
    /// Working copy to build in.
    pub dir: PathBuf,
}

impl BuildStep {
    /// Commands run, in order, for this step.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        match self.component {
            Component::Backend => vec![
                CommandSpec::new("mvn")
                    .args(["-B", "-q", "-DskipTests", "package"])
                    .with_cwd(&self.dir),
            ],
            Component::Frontend => vec![
                CommandSpec::new("npm")
                    .args(["ci", "--no-audit", "--no-fund"])
                    .with_cwd(&self.dir),
                CommandSpec::new("npm").args(["run", "build"]).with_cwd(&self.dir),
            ],
        }
    }
}

/// An ACME certificate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Domain to certify.
    pub domain: String,
    /// Contact address registered with the CA.
    pub email: String,
    /// Directory served for the HTTP-01 challenge.
    pub webroot: PathBuf,
}

/// Typed operations against the target host.
///
/// Query methods never mutate. Mutating methods perform exactly the change
/// requested and nothing else.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Host: Send + Sync {
    /// Effective uid of the orchestrator process.
    async fn effective_uid(&self) -> u32;

    /// Free space on the filesystem holding `path` (or its nearest existing ancestor).
    async fn available_space(&self, path: &Path) -> Result<DiskSpace>;

    /// TCP listeners currently bound.
    async fn listeners(&self) -> Result<Vec<Listener>>;

    /// Subset of `names` that is not installed.
    async fn missing_packages(&self, names: &[String]) -> Result<Vec<String>>;

    /// Installs packages in one transaction.
    async fn install_packages(&self, names: &[String]) -> Result<()>;

    /// Services allowed in the permanent firewall configuration.
    async fn firewall_services(&self) -> Result<BTreeSet<String>>;

    /// Permanently allows a service.
    async fn firewall_add_service(&self, service: &str) -> Result<()>;

    /// Permanently removes a service.
    async fn firewall_remove_service(&self, service: &str) -> Result<()>;

    /// Applies the permanent configuration to the runtime.
    async fn firewall_reload(&self) -> Result<()>;

    /// State of a systemd unit.
    async fn service_state(&self, unit: &str) -> Result<ServiceState>;

    /// Runs a `systemctl` action on a unit.
    async fn service_action(&self, action: ServiceAction, unit: &str) -> Result<()>;

    /// Reloads systemd unit files.
    async fn daemon_reload(&self) -> Result<()>;

    /// Initializes the PostgreSQL cluster.
    async fn init_database_cluster(&self) -> Result<()>;

    /// Whether a database role exists.
    async fn role_exists(&self, role: &str) -> Result<bool>;

    /// Creates a login role with a password.
    async fn create_role(&self, role: &str, password: &str) -> Result<()>;

    /// Sets the password of an existing role.
    async fn set_role_password(&self, role: &str, password: &str) -> Result<()>;

    /// Whether a database exists.
    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Creates a database owned by `owner`.
    async fn create_database(&self, name: &str, owner: &str) -> Result<()>;

    /// Whether a system user exists.
    async fn user_exists(&self, name: &str) -> Result<bool>;

    /// Creates a system user and its group.
    async fn create_system_user(&self, account: &ServiceAccount) -> Result<()>;

    /// Whether a path exists.
    async fn path_exists(&self, path: &Path) -> Result<bool>;

    /// Whether a file or directory exists and can be read.
    async fn is_readable(&self, path: &Path) -> Result<bool>;

    /// Reads a file; `None` if it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Writes a file atomically and applies `perms`. Parent directories are created.
    async fn write_file(&self, path: &Path, contents: &[u8], perms: &FilePerms) -> Result<()>;

    /// Applies `perms` to an existing path; returns true if anything changed.
    async fn set_perms(&self, path: &Path, perms: &FilePerms) -> Result<bool>;

    /// Removes a file if present.
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Creates a directory (and parents); returns true if it was created.
    async fn ensure_dir(&self, path: &Path, perms: &FilePerms) -> Result<bool>;

    /// SHA-256 of a file; `None` if it does not exist.
    async fn file_digest(&self, path: &Path) -> Result<Option<String>>;

    /// Copies a file and applies `perms`.
    async fn copy_file(&self, src: &Path, dst: &Path, perms: &FilePerms) -> Result<()>;

    /// Makes `dst` an exact mirror of `src`, leaving top-level entries named in
    /// `exclude` untouched on both sides.
    async fn mirror_tree(&self, src: &Path, dst: &Path, exclude: &[String]) -> Result<SyncReport>;

    /// Hex SHA-256 over relative paths and contents of the files below `root`,
    /// skipping top-level entries named in `exclude`.
    async fn tree_digest(&self, root: &Path, exclude: &[String]) -> Result<String>;

    /// Names of regular files directly inside `dir`.
    async fn list_files(&self, dir: &Path) -> Result<Vec<String>>;

    /// Applies ownership and modes below `root`; returns the number of entries changed.
    async fn apply_tree_perms(&self, root: &Path, perms: &TreePerms) -> Result<usize>;

    /// Runs a build in its working copy.
    async fn run_build(&self, step: &BuildStep) -> Result<()>;

    /// Checks the reverse proxy configuration (`nginx -t`).
    async fn test_proxy_config(&self) -> Result<()>;

    /// Requests a certificate from the ACME CA.
    async fn request_certificate(&self, request: &CertificateRequest) -> Result<()>;
}
