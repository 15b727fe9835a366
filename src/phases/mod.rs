//! The ten deployment phases.
//!
//! Each phase first asks the host whether its target state already holds,
//! and only then performs the smallest mutation that gets there. Phases
//! share a read-only [`PhaseContext`] and a mutable [`RunState`] that
//! carries facts forward (what changed, where the artifacts are) and
//! collects compensations for rollback.

mod accounts;
mod build;
mod database;
mod dependencies;
mod deploy;
mod firewall;
mod health;
mod services;
mod sources;
mod tls;

pub use build::{frontend_output_candidates, select_jar};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{ConfigHasher, DeployConfig, HostLayout};
use crate::error::Result;
use crate::host::{FilePerms, Host};
use crate::planner::{Compensation, PhaseKind, PhaseStatus};
use crate::probe::{HealthProbe, HealthReport};

/// Nginx unit name.
pub const NGINX_UNIT: &str = "nginx.service";

/// PostgreSQL unit name.
pub const POSTGRES_UNIT: &str = "postgresql.service";

/// Read-only inputs shared by every phase.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    /// Validated configuration.
    pub config: &'a DeployConfig,
    /// Derived host paths.
    pub layout: &'a HostLayout,
    /// Target host.
    pub host: &'a dyn Host,
    /// Health probe used by the last phase.
    pub probe: &'a dyn HealthProbe,
    /// Content hasher.
    pub hasher: &'a ConfigHasher,
}

impl std::fmt::Debug for PhaseContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("app", &self.layout.app_name)
            .field("domain", &self.config.domain)
            .finish_non_exhaustive()
    }
}

/// Facts accumulated while the plan runs.
#[derive(Debug, Default)]
pub struct RunState {
    /// Deployable jar found after the build.
    pub backend_artifact: Option<PathBuf>,
    /// Directory holding the built frontend.
    pub frontend_output: Option<PathBuf>,
    /// The installed jar was replaced.
    pub jar_changed: bool,
    /// Reversal steps, in registration order.
    pub compensations: Vec<Compensation>,
    /// Accounts created by this run.
    pub accounts_created: Vec<String>,
    /// Files written by this run.
    pub files_written: Vec<PathBuf>,
    /// Units the plan manages, in the order they were ensured.
    pub services: Vec<String>,
    /// Result of the health check, when it passed.
    pub health: Option<HealthReport>,
}

impl RunState {
    /// Registers a compensation.
    pub fn compensate(&mut self, compensation: Compensation) {
        debug!("Registered compensation: {compensation}");
        self.compensations.push(compensation);
    }

    /// Records a managed unit once.
    pub fn track_service(&mut self, unit: &str) {
        if !self.services.iter().any(|s| s == unit) {
            self.services.push(unit.to_string());
        }
    }
}

/// What a phase did.
#[derive(Debug, Default, Clone)]
pub struct PhaseReport {
    created: bool,
    changes: Vec<String>,
    note: Option<String>,
}

impl PhaseReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records something brought into existence.
    pub fn created(&mut self, change: impl Into<String>) {
        self.created = true;
        self.record(change.into());
    }

    /// Records a modification of something that already existed.
    pub fn updated(&mut self, change: impl Into<String>) {
        self.record(change.into());
    }

    /// Attaches an informational note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn record(&mut self, change: String) {
        info!(outcome = "success", "{change}");
        self.changes.push(change);
    }

    /// Resulting phase status.
    #[must_use]
    pub fn status(&self) -> PhaseStatus {
        if self.changes.is_empty() {
            PhaseStatus::Skipped
        } else if self.created {
            PhaseStatus::Created
        } else {
            PhaseStatus::Updated
        }
    }

    /// Changes performed.
    #[must_use]
    pub fn changes(&self) -> &[String] {
        &self.changes
    }

    /// Informational note.
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Consumes the report.
    #[must_use]
    pub fn into_parts(self) -> (PhaseStatus, Vec<String>, Option<String>) {
        let status = self.status();
        (status, self.changes, self.note)
    }
}

/// One idempotent deployment step.
#[async_trait]
pub trait Phase: Send + Sync {
    /// Which phase this is.
    fn kind(&self) -> PhaseKind;

    /// Brings the host to the phase's target state.
    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport>;
}

/// Instantiates the phases for `kinds`, preserving order.
#[must_use]
pub fn phases_for(kinds: &[PhaseKind]) -> Vec<Box<dyn Phase>> {
    kinds.iter().map(|kind| phase(*kind)).collect()
}

fn phase(kind: PhaseKind) -> Box<dyn Phase> {
    match kind {
        PhaseKind::Firewall => Box::new(firewall::FirewallPhase),
        PhaseKind::Dependencies => Box::new(dependencies::DependenciesPhase),
        PhaseKind::Database => Box::new(database::DatabasePhase),
        PhaseKind::Accounts => Box::new(accounts::AccountsPhase),
        PhaseKind::Sources => Box::new(sources::SourcesPhase),
        PhaseKind::Build => Box::new(build::BuildPhase),
        PhaseKind::Deploy => Box::new(deploy::DeployPhase),
        PhaseKind::Services => Box::new(services::ServicesPhase),
        PhaseKind::Tls => Box::new(tls::TlsPhase),
        PhaseKind::HealthCheck => Box::new(health::HealthCheckPhase),
    }
}

/// A file rewritten by [`install_file`].
#[derive(Debug, Clone)]
pub(crate) struct FileWrite {
    /// Path written.
    pub path: PathBuf,
    /// Contents before the write.
    pub previous: Option<Vec<u8>>,
    /// Permissions applied.
    pub perms: FilePerms,
}

impl FileWrite {
    /// The file did not exist before.
    pub const fn is_new(&self) -> bool {
        self.previous.is_none()
    }

    /// Compensation putting the previous contents back.
    pub fn compensation(&self) -> Compensation {
        Compensation::restore(&self.path, self.previous.clone(), self.perms.clone())
    }
}

/// Writes `contents` to `path` unless it already holds exactly that.
///
/// Permissions are reconciled either way. Returns the write performed, or
/// `None` when the content already matched.
pub(crate) async fn install_file(
    ctx: &PhaseContext<'_>,
    run: &mut RunState,
    path: &Path,
    contents: &[u8],
    perms: FilePerms,
) -> Result<Option<FileWrite>> {
    let previous = ctx.host.read_file(path).await?;

    if let Some(current) = &previous {
        if ctx.hasher.content_matches(current, contents) {
            if ctx.host.set_perms(path, &perms).await? {
                debug!("Fixed permissions on {}", path.display());
            }
            return Ok(None);
        }
    }

    ctx.host.write_file(path, contents, &perms).await?;
    run.files_written.push(path.to_path_buf());

    Ok(Some(FileWrite {
        path: path.to_path_buf(),
        previous,
        perms,
    }))
}

/// Records a file write in `report` as created or updated.
pub(crate) fn report_write(report: &mut PhaseReport, write: &FileWrite) {
    if write.is_new() {
        report.created(format!("Installed {}", write.path.display()));
    } else {
        report.updated(format!("Updated {}", write.path.display()));
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[test]
    fn test_report_status() {
        let mut report = PhaseReport::new();
        assert_eq!(report.status(), PhaseStatus::Skipped);
        report.updated("changed a thing");
        assert_eq!(report.status(), PhaseStatus::Updated);
        report.created("made a thing");
        assert_eq!(report.status(), PhaseStatus::Created);
        assert_eq!(report.changes().len(), 2);
    }

    #[test]
    fn test_phases_for_preserves_order() {
        let phases = phases_for(&PhaseKind::ALL);
        let kinds: Vec<PhaseKind> = phases.iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, PhaseKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_install_file_writes_once() {
        let mut harness = Harness::new();
        let (ctx, run) = harness.parts();
        let path = Path::new("/etc/shop/test.conf");

        let first = install_file(&ctx, run, path, b"a=1\n", FilePerms::root(0o644))
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_new());
        assert_eq!(first.compensation(), Compensation::restore(path, None, FilePerms::root(0o644)));

        let second = install_file(&ctx, run, path, b"a=1\n", FilePerms::root(0o644))
            .await
            .unwrap();
        assert!(second.is_none());

        let third = install_file(&ctx, run, path, b"a=2\n", FilePerms::root(0o644))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third.previous.as_deref(), Some(&b"a=1\n"[..]));
        assert_eq!(run.files_written.len(), 2);
    }

    #[tokio::test]
    async fn test_install_file_fixes_perms_only() {
        let mut harness = Harness::new();
        let path = Path::new("/etc/shop/test.conf");
        {
            let (ctx, run) = harness.parts();
            install_file(&ctx, run, path, b"x\n", FilePerms::root(0o644)).await.unwrap();
        }
        harness.host.clear_mutations();

        let (ctx, run) = harness.parts();
        let write = install_file(&ctx, run, path, b"x\n", FilePerms::root(0o600)).await.unwrap();
        assert!(write.is_none());
        assert_eq!(harness.host.mutations(), vec![String::from("chmod /etc/shop/test.conf")]);
    }
}
