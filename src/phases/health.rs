//! Post-deploy health check.

use async_trait::async_trait;
use std::time::Duration;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::Result;
use crate::planner::PhaseKind;
use crate::probe::{health_url, wait_until_healthy};

/// Polls the backend on loopback. Never mutates the host.
pub struct HealthCheckPhase;

#[async_trait]
impl Phase for HealthCheckPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::HealthCheck
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let health = &ctx.config.health;
        let url = health_url(ctx.config.app.port, &health.path);

        let outcome = wait_until_healthy(
            ctx.probe,
            &url,
            health.attempts,
            Duration::from_secs(health.interval_secs),
        )
        .await?;

        let note = format!("{url} healthy after {} attempt(s)", outcome.attempts);
        run.health = Some(outcome);
        Ok(PhaseReport::new().with_note(note))
    }
}
