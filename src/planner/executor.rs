//! Plan executor for running deployment phases.
//!
//! Phases run strictly in order. The first fatal failure stops the run,
//! marks the remaining phases as not run, and replays the compensations
//! registered so far in reverse. A health-check timeout is reported as a
//! failure but leaves the deployed state in place.

use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::DeployError;
use crate::phases::{PhaseContext, RunState, phases_for};

use super::compensation::Compensation;
use super::plan::{DeploymentPlan, PhaseKind};

/// Final status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Something was brought into existence.
    Created,
    /// Existing state was modified.
    Updated,
    /// Target state already held.
    Skipped,
    /// The phase failed.
    Failed,
    /// The phase never started because an earlier one failed.
    NotRun,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::NotRun => "not run",
        };
        write!(f, "{s}")
    }
}

/// Result of executing a single phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    /// Phase executed.
    pub kind: PhaseKind,
    /// Final status.
    pub status: PhaseStatus,
    /// Changes made.
    pub changes: Vec<String>,
    /// Informational note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of replaying one compensation.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackStep {
    /// What was undone.
    pub action: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message (if failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// One outcome per planned phase, in order.
    pub outcomes: Vec<PhaseOutcome>,
    /// The failure that stopped the run, wrapped with its phase name.
    pub failure: Option<DeployError>,
    /// Compensations replayed after a fatal failure.
    pub rollback: Vec<RollbackStep>,
    /// Facts collected by the phases.
    pub state: RunState,
}

/// Executor for deployment plans.
#[derive(Debug)]
pub struct PlanExecutor<'a> {
    ctx: PhaseContext<'a>,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(ctx: PhaseContext<'a>) -> Self {
        Self { ctx }
    }

    /// Executes a deployment plan.
    ///
    /// Never returns early: the outcome of every planned phase is in the result.
    pub async fn execute(&self, plan: &DeploymentPlan) -> ExecutionResult {
        let total = plan.phase_count();
        info!("Executing deployment plan with {total} phases (run {})", plan.short_run_id());

        let mut state = RunState::default();
        let mut outcomes = Vec::with_capacity(total);
        let mut failure: Option<DeployError> = None;

        for (idx, phase) in phases_for(&plan.phases).into_iter().enumerate() {
            let kind = phase.kind();

            if failure.is_some() {
                outcomes.push(PhaseOutcome::not_run(kind));
                continue;
            }

            info!("[{}/{total}] {kind}: {}", idx + 1, kind.description());
            let start = Instant::now();
            let result = phase.apply(&self.ctx, &mut state).await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(report) => {
                    let (status, changes, note) = report.into_parts();
                    if status == PhaseStatus::Skipped && changes.is_empty() {
                        info!("{kind}: already in target state");
                    }
                    info!(outcome = "success", "Phase {kind} {status} in {duration_ms}ms");
                    outcomes.push(PhaseOutcome {
                        kind,
                        status,
                        changes,
                        note,
                        duration_ms,
                        error: None,
                    });
                }
                Err(e) => {
                    error!("Phase {kind} failed: {e}");
                    outcomes.push(PhaseOutcome {
                        kind,
                        status: PhaseStatus::Failed,
                        changes: Vec::new(),
                        note: None,
                        duration_ms,
                        error: Some(e.to_string()),
                    });
                    failure = Some(e.in_phase(kind.to_string()));
                }
            }
        }

        let rollback = match &failure {
            Some(e) if e.is_fatal() => self.roll_back(std::mem::take(&mut state.compensations)).await,
            Some(_) => {
                warn!("Leaving deployed state in place; the failure does not warrant rollback");
                Vec::new()
            }
            None => Vec::new(),
        };

        let result = ExecutionResult {
            outcomes,
            failure,
            rollback,
            state,
        };
        info!("{result}");
        result
    }

    /// Replays compensations in reverse registration order. Failures are
    /// logged and do not stop the remaining steps.
    async fn roll_back(&self, compensations: Vec<Compensation>) -> Vec<RollbackStep> {
        if compensations.is_empty() {
            info!("No changes from this run need rolling back");
            return Vec::new();
        }

        warn!("Rolling back {} change(s) made by this run", compensations.len());
        let mut steps = Vec::with_capacity(compensations.len());

        for compensation in compensations.into_iter().rev() {
            let action = compensation.to_string();
            match compensation.apply(self.ctx.host).await {
                Ok(()) => {
                    info!("Rolled back: {action}");
                    steps.push(RollbackStep {
                        action,
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    error!("Rollback step '{action}' failed: {e}");
                    steps.push(RollbackStep {
                        action,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        steps
    }
}

impl PhaseOutcome {
    fn not_run(kind: PhaseKind) -> Self {
        Self {
            kind,
            status: PhaseStatus::NotRun,
            changes: Vec::new(),
            note: None,
            duration_ms: 0,
            error: None,
        }
    }
}

impl ExecutionResult {
    /// Returns true if every phase succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of phases with the given status.
    #[must_use]
    pub fn count(&self, status: PhaseStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} phases: {} created, {} updated, {} skipped, {} failed, {} not run",
            self.outcomes.len() - self.count(PhaseStatus::NotRun),
            self.count(PhaseStatus::Created),
            self.count(PhaseStatus::Updated),
            self.count(PhaseStatus::Skipped),
            self.count(PhaseStatus::Failed),
            self.count(PhaseStatus::NotRun),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::testing::Harness;
    use crate::probe::EndpointCheck;

    fn healthy(harness: &mut Harness) {
        harness.probe.expect_check().returning(|url| EndpointCheck {
            url: url.to_string(),
            healthy: true,
            status_code: Some(200),
            response_time_ms: Some(3),
            error: None,
        });
    }

    fn statuses(result: &ExecutionResult) -> Vec<PhaseStatus> {
        result.outcomes.iter().map(|o| o.status).collect()
    }

    #[tokio::test]
    async fn test_full_run_then_idempotent_rerun() {
        let mut harness = Harness::new();
        healthy(&mut harness);
        let plan = DeploymentPlan::new("hash");

        let (ctx, _) = harness.parts();
        let first = PlanExecutor::new(ctx).execute(&plan).await;
        assert!(first.success(), "{:?}", first.failure);
        assert_eq!(first.count(PhaseStatus::Failed), 0);

        harness.host.clear_mutations();
        let (ctx, _) = harness.parts();
        let second = PlanExecutor::new(ctx).execute(&plan).await;
        assert!(second.success());
        assert_eq!(
            second.to_string(),
            "Executed 10 phases: 0 created, 1 updated, 9 skipped, 0 failed, 0 not run"
        );

        let mut expected = vec![PhaseStatus::Skipped; 10];
        expected[PhaseKind::Database.number() - 1] = PhaseStatus::Updated;
        assert_eq!(statuses(&second), expected);
        assert_eq!(harness.host.mutations(), vec![String::from("alter role bar password")]);
    }

    #[tokio::test]
    async fn test_failure_stops_and_rolls_back() {
        let mut harness = Harness::new();
        harness.host.fail_on("certbot");
        let plan = DeploymentPlan::new("hash");

        let (ctx, _) = harness.parts();
        let result = PlanExecutor::new(ctx).execute(&plan).await;

        let tls = PhaseKind::Tls.number() - 1;
        assert_eq!(result.outcomes[tls].status, PhaseStatus::Failed);
        assert_eq!(result.outcomes[tls + 1].status, PhaseStatus::NotRun);
        assert!(result.outcomes[..tls].iter().all(|o| o.status != PhaseStatus::Failed));

        let undone: Vec<&str> = result.rollback.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(
            undone,
            vec![
                "remove /etc/nginx/conf.d/webapp.conf",
                "reload nginx.service",
                "stop webapp.service",
                "remove /etc/systemd/system/webapp.service",
                "systemd daemon-reload",
                "remove /etc/webapp/webapp.env",
            ]
        );
        assert!(result.rollback.iter().all(|s| s.success));
        assert!(result.state.compensations.is_empty());

        match &result.failure {
            Some(DeployError::PhaseFailed { phase, .. }) => assert_eq!(phase, "tls"),
            other => panic!("unexpected failure: {other:?}"),
        }

        let state = harness.host.lock().clone();
        assert!(!state.files.contains_key(std::path::Path::new("/etc/webapp/webapp.env")));
        assert!(state.services.get("webapp.service").is_some_and(|s| !s.active));
        // Never compensated.
        assert!(state.users.contains("webapp"));
        assert!(state.databases.contains_key("foo"));
    }

    #[tokio::test]
    async fn test_health_timeout_keeps_deployment() {
        let mut harness = Harness::new();
        harness.config.health.attempts = 1;
        harness.probe.expect_check().returning(|url| EndpointCheck {
            url: url.to_string(),
            healthy: false,
            status_code: Some(502),
            response_time_ms: Some(1),
            error: Some(String::from("HTTP 502 Bad Gateway")),
        });
        let plan = DeploymentPlan::new("hash");

        let (ctx, _) = harness.parts();
        let result = PlanExecutor::new(ctx).execute(&plan).await;

        assert_eq!(result.outcomes[9].status, PhaseStatus::Failed);
        assert!(result.rollback.is_empty());
        assert!(result.failure.as_ref().is_some_and(|e| !e.is_fatal()));
        assert!(harness.host.lock().services.get("webapp.service").is_some_and(|s| s.active));
    }

    #[tokio::test]
    async fn test_failure_in_each_phase_halts_sequence() {
        let cases = [
            (PhaseKind::Firewall, "firewall add"),
            (PhaseKind::Dependencies, "dnf install java"),
            (PhaseKind::Database, "create role"),
            (PhaseKind::Accounts, "useradd"),
            (PhaseKind::Sources, "mirror /srv/frontend"),
            (PhaseKind::Build, "build backend"),
            (PhaseKind::Deploy, "chown -R"),
            (PhaseKind::Services, "systemctl daemon-reload"),
            (PhaseKind::Tls, "certbot"),
        ];

        for (kind, prefix) in cases {
            let mut harness = Harness::new();
            harness.host.fail_on(prefix);
            let plan = DeploymentPlan::new("hash");

            let (ctx, _) = harness.parts();
            let result = PlanExecutor::new(ctx).execute(&plan).await;

            let failed = kind.number() - 1;
            for (i, outcome) in result.outcomes.iter().enumerate() {
                let expected_ok = i < failed;
                match outcome.status {
                    PhaseStatus::Failed => assert_eq!(i, failed, "{kind}"),
                    PhaseStatus::NotRun => assert!(i > failed, "{kind}"),
                    _ => assert!(expected_ok, "{kind}"),
                }
            }
            assert!(result.failure.is_some(), "{kind}");
        }
    }
}
