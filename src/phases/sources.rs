//! Source tree mirroring into the deploy-owned working copy.

use async_trait::async_trait;
use tracing::debug;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::Result;
use crate::host::Component;
use crate::planner::PhaseKind;

/// Mirrors both source trees with replace semantics.
pub struct SourcesPhase;

#[async_trait]
impl Phase for SourcesPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Sources
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, _run: &mut RunState) -> Result<PhaseReport> {
        let sources = &ctx.config.sources;
        let layout = ctx.layout;
        let mut report = PhaseReport::new();

        for (component, src, dst) in [
            (Component::Backend, &sources.backend, &layout.backend_work_dir),
            (Component::Frontend, &sources.frontend, &layout.frontend_work_dir),
        ] {
            let existed = ctx.host.path_exists(dst).await?;
            let sync = ctx.host.mirror_tree(src, dst, &sources.exclude).await?;

            if !sync.changed() {
                debug!("{component} working copy is up to date");
                continue;
            }

            let message = format!("Synced {component} sources into {} ({sync})", dst.display());
            if existed {
                report.updated(message);
            } else {
                report.created(message);
            }
        }

        Ok(report)
    }
}
