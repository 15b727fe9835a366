//! PostgreSQL cluster, role, database and access rules.
//!
//! Databases are created but never dropped or altered. The role password is
//! set on every run, so this phase always reports at least an update.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{POSTGRES_UNIT, Phase, PhaseContext, PhaseReport, RunState};
use crate::error::{ConfigError, Result};
use crate::host::{FilePerms, ServiceAction};
use crate::planner::PhaseKind;
use crate::render::{ensure_hba_rules, hba_rules, restrict_listen_addresses};

const POSTGRES_USER: &str = "postgres";

/// Provisions the database the backend connects to.
pub struct DatabasePhase;

#[async_trait]
impl Phase for DatabasePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Database
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let host = ctx.host;
        let layout = ctx.layout;
        let db = &ctx.config.database;
        let mut report = PhaseReport::new();

        if host.path_exists(&layout.pg_version_marker()).await? {
            debug!("PostgreSQL cluster already initialized");
        } else {
            host.init_database_cluster().await?;
            report.created("Initialized PostgreSQL cluster");
        }

        let state = host.service_state(POSTGRES_UNIT).await?;
        if !state.enabled {
            host.service_action(ServiceAction::Enable, POSTGRES_UNIT).await?;
            report.updated("Enabled postgresql");
        }
        if !state.active {
            host.service_action(ServiceAction::Start, POSTGRES_UNIT).await?;
            report.updated("Started postgresql");
        }
        run.track_service(POSTGRES_UNIT);

        if host.role_exists(&db.user).await? {
            host.set_role_password(&db.user, &db.password).await?;
            report.updated(format!("Set password for role {}", db.user));
        } else {
            host.create_role(&db.user, &db.password).await?;
            report.created(format!("Created role {}", db.user));
        }

        if host.database_exists(&db.name).await? {
            debug!("Database {} already exists", db.name);
        } else {
            host.create_database(&db.name, &db.user).await?;
            report.created(format!("Created database {} owned by {}", db.name, db.user));
        }

        let perms = FilePerms::owned(0o600, POSTGRES_USER, POSTGRES_USER);
        let mut config_changed = false;

        let hba_path = layout.pg_hba();
        let hba = read_text(ctx, &hba_path).await?;
        if let Some(updated) = ensure_hba_rules(&hba, &hba_rules(&db.name, &db.user)) {
            host.write_file(&hba_path, updated.as_bytes(), &perms).await?;
            run.files_written.push(hba_path.clone());
            report.updated(format!("Added loopback access rules to {}", hba_path.display()));
            config_changed = true;
        }

        let conf_path = layout.pg_conf();
        let conf = read_text(ctx, &conf_path).await?;
        if let Some(updated) = restrict_listen_addresses(&conf) {
            host.write_file(&conf_path, updated.as_bytes(), &perms).await?;
            run.files_written.push(conf_path.clone());
            report.updated("Restricted PostgreSQL to localhost");
            config_changed = true;
        }

        if config_changed {
            info!("PostgreSQL configuration changed, restarting");
            host.service_action(ServiceAction::Restart, POSTGRES_UNIT).await?;
        }

        Ok(report)
    }
}

async fn read_text(ctx: &PhaseContext<'_>, path: &std::path::Path) -> Result<String> {
    let bytes = ctx
        .host
        .read_file(path)
        .await?
        .ok_or_else(|| ConfigError::PathUnavailable {
            path: path.to_path_buf(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
