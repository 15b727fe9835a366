//! Runtime package installation.

use async_trait::async_trait;
use tracing::debug;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::{DeployError, Result};
use crate::planner::PhaseKind;

/// Installs whatever part of the package list is missing, in one transaction.
pub struct DependenciesPhase;

#[async_trait]
impl Phase for DependenciesPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Dependencies
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, _run: &mut RunState) -> Result<PhaseReport> {
        let required = &ctx.config.packages.required;
        let mut report = PhaseReport::new();

        let missing = ctx.host.missing_packages(required).await?;
        if missing.is_empty() {
            debug!("All {} packages already installed", required.len());
            return Ok(report);
        }

        ctx.host.install_packages(&missing).await?;

        let still_missing = ctx.host.missing_packages(&missing).await?;
        if !still_missing.is_empty() {
            return Err(DeployError::internal(format!(
                "Packages still missing after install: {}",
                still_missing.join(", ")
            )));
        }

        report.created(format!("Installed {}", missing.join(", ")));
        Ok(report)
    }
}
