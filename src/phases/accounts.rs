//! Application service account.

use async_trait::async_trait;
use tracing::debug;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::Result;
use crate::host::ServiceAccount;
use crate::planner::PhaseKind;

/// Shell for accounts that must not log in.
const NOLOGIN_SHELL: &str = "/sbin/nologin";

/// Creates the system user and group the backend runs as. Existing accounts
/// are never modified.
pub struct AccountsPhase;

#[async_trait]
impl Phase for AccountsPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Accounts
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let name = &ctx.layout.service_user;
        let mut report = PhaseReport::new();

        if ctx.host.user_exists(name).await? {
            debug!("Service account {name} already exists");
            return Ok(report);
        }

        let account = ServiceAccount {
            name: name.clone(),
            home: ctx.layout.deploy_root.clone(),
            shell: String::from(NOLOGIN_SHELL),
        };
        ctx.host.create_system_user(&account).await?;
        run.accounts_created.push(name.clone());
        report.created(format!("Created system account {name}"));

        Ok(report)
    }
}
