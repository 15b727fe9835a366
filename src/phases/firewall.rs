//! Firewall allow-list reconciliation.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::Result;
use crate::host::ServiceAction;
use crate::planner::PhaseKind;

const FIREWALLD_PACKAGE: &str = "firewalld";
const FIREWALLD_UNIT: &str = "firewalld.service";

/// Makes the permanent firewalld service set equal to the allow-list.
pub struct FirewallPhase;

#[async_trait]
impl Phase for FirewallPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Firewall
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let host = ctx.host;
        let mut report = PhaseReport::new();

        let package = vec![String::from(FIREWALLD_PACKAGE)];
        if !host.missing_packages(&package).await?.is_empty() {
            host.install_packages(&package).await?;
            report.created("Installed firewalld");
        }

        let state = host.service_state(FIREWALLD_UNIT).await?;
        if !state.enabled {
            host.service_action(ServiceAction::Enable, FIREWALLD_UNIT).await?;
            report.updated("Enabled firewalld");
        }
        if !state.active {
            host.service_action(ServiceAction::Start, FIREWALLD_UNIT).await?;
            report.updated("Started firewalld");
        }
        run.track_service(FIREWALLD_UNIT);

        let wanted: BTreeSet<String> = ctx.config.firewall.services.iter().cloned().collect();
        let current = host.firewall_services().await?;
        debug!("Firewall services: current {current:?}, wanted {wanted:?}");

        let mut changed = false;
        for service in wanted.difference(&current) {
            host.firewall_add_service(service).await?;
            report.updated(format!("Allowed firewall service {service}"));
            changed = true;
        }
        for service in current.difference(&wanted) {
            host.firewall_remove_service(service).await?;
            report.updated(format!("Removed firewall service {service}"));
            changed = true;
        }

        if changed {
            host.firewall_reload().await?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::planner::PhaseStatus;

    #[tokio::test]
    async fn test_reconciles_to_allow_list() {
        let mut harness = Harness::new();
        let (ctx, run) = harness.parts();

        let report = FirewallPhase.apply(&ctx, run).await.unwrap();
        assert_eq!(report.status(), PhaseStatus::Created);

        let state = harness.host.lock().clone();
        let services: Vec<&str> = state.firewall.iter().map(String::as_str).collect();
        assert_eq!(services, vec!["http", "https", "ssh"]);

        let log = harness.host.mutations();
        assert_eq!(log.last().map(String::as_str), Some("firewall reload"));
        assert!(log.contains(&String::from("firewall remove cockpit")));
        assert!(log.contains(&String::from("firewall add http")));
    }

    #[tokio::test]
    async fn test_second_pass_is_skipped() {
        let mut harness = Harness::new();
        {
            let (ctx, run) = harness.parts();
            FirewallPhase.apply(&ctx, run).await.unwrap();
        }
        harness.host.clear_mutations();

        let (ctx, run) = harness.parts();
        let report = FirewallPhase.apply(&ctx, run).await.unwrap();
        assert_eq!(report.status(), PhaseStatus::Skipped);
        assert!(harness.host.mutations().is_empty());
    }
}
