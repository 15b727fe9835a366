//! Top-level driver for a deployment run.
//!
//! Validates the configuration, runs the pre-flight checks, executes the
//! plan, and turns the outcome into a [`DeploymentReport`]. Validation and
//! pre-flight failures are returned as errors before the host is touched;
//! phase failures are carried inside the report so the phase table can
//! still be shown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigHasher, ConfigValidator, DeployConfig, HostLayout};
use crate::error::{DeployError, Result};
use crate::host::Host;
use crate::phases::PhaseContext;
use crate::planner::{DeploymentPlan, ExecutionResult, PhaseOutcome, PlanExecutor, RollbackStep};
use crate::preflight::{Preflight, PreflightReport};
use crate::probe::HealthProbe;

/// Outcome of `validate`: configuration warnings plus the pre-flight observations.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    /// Non-fatal configuration findings.
    pub warnings: Vec<String>,
    /// What the pre-flight checks observed.
    pub preflight: PreflightReport,
}

/// Summary of a finished run.
#[derive(Debug, Serialize)]
pub struct DeploymentReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Configuration fingerprint.
    pub config_hash: String,
    /// Host the run executed on.
    pub hostname: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Per-phase outcomes, in order.
    pub phases: Vec<PhaseOutcome>,
    /// Compensations replayed after a failure.
    pub rollback: Vec<RollbackStep>,
    /// Accounts created by this run.
    pub accounts_created: Vec<String>,
    /// Files written by this run.
    pub files_written: Vec<PathBuf>,
    /// Units managed by the deployment.
    pub services: Vec<String>,
    /// Public URL of the application.
    pub url: String,
    /// Configuration warnings.
    pub warnings: Vec<String>,
    /// Failure message, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure itself.
    #[serde(skip)]
    pub failure: Option<DeployError>,
}

impl DeploymentReport {
    /// Returns true if every phase succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.failure.as_ref().map_or(0, DeployError::exit_code)
    }
}

/// Drives validation, pre-flight and plan execution against one host.
pub struct Orchestrator<'a> {
    config: &'a DeployConfig,
    layout: HostLayout,
    host: &'a dyn Host,
    probe: &'a dyn HealthProbe,
    hasher: ConfigHasher,
    validator: ConfigValidator,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator for `config`.
    #[must_use]
    pub fn new(config: &'a DeployConfig, host: &'a dyn Host, probe: &'a dyn HealthProbe) -> Self {
        Self {
            config,
            layout: HostLayout::from_config(config),
            host,
            probe,
            hasher: ConfigHasher::new(),
            validator: ConfigValidator::new(),
        }
    }

    /// Derived host paths.
    #[must_use]
    pub const fn layout(&self) -> &HostLayout {
        &self.layout
    }

    /// Configuration fingerprint.
    #[must_use]
    pub fn config_hash(&self) -> String {
        self.hasher.hash_config(self.config)
    }

    /// The full ten-phase plan.
    #[must_use]
    pub fn plan(&self) -> DeploymentPlan {
        DeploymentPlan::new(&self.config_hash())
    }

    /// Validates the configuration only.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error.
    pub fn check_config(&self) -> Result<Vec<String>> {
        let result = self.validator.validate(self.config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }
        Ok(result.warnings)
    }

    /// Validates the configuration and runs the pre-flight checks.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or pre-flight error.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let warnings = self.check_config()?;
        let preflight = Preflight::new(self.config, &self.layout, self.host).run().await?;
        Ok(ValidationReport { warnings, preflight })
    }

    /// Runs the full deployment.
    ///
    /// # Errors
    ///
    /// Returns validation and pre-flight errors. Phase failures are reported
    /// in [`DeploymentReport::failure`].
    pub async fn deploy(&self) -> Result<DeploymentReport> {
        let started_at = Utc::now();
        let validation = self.validate().await?;
        let plan = self.plan();
        info!(
            "Deploying {} to {} (config {}, run {})",
            self.layout.app_name,
            self.config.domain,
            self.hasher.short_hash(&plan.config_hash),
            plan.short_run_id()
        );

        let result = self.executor().execute(&plan).await;
        Ok(self.report(&plan, result, validation.warnings, started_at).await)
    }

    /// Runs only the health check.
    ///
    /// # Errors
    ///
    /// Returns configuration errors.
    pub async fn health(&self) -> Result<DeploymentReport> {
        let started_at = Utc::now();
        let warnings = self.check_config()?;
        let plan = DeploymentPlan::health_only(&self.config_hash());

        let result = self.executor().execute(&plan).await;
        Ok(self.report(&plan, result, warnings, started_at).await)
    }

    fn executor(&self) -> PlanExecutor<'_> {
        PlanExecutor::new(PhaseContext {
            config: self.config,
            layout: &self.layout,
            host: self.host,
            probe: self.probe,
            hasher: &self.hasher,
        })
    }

    async fn report(
        &self,
        plan: &DeploymentPlan,
        result: ExecutionResult,
        warnings: Vec<String>,
        started_at: DateTime<Utc>,
    ) -> DeploymentReport {
        let url = self.public_url().await;
        let ExecutionResult {
            outcomes,
            failure,
            rollback,
            state,
        } = result;

        match &failure {
            Some(e) => error!("Deployment failed: {e}"),
            None => info!(outcome = "success", "Deployment complete: {url}"),
        }

        DeploymentReport {
            run_id: plan.run_id,
            config_hash: plan.config_hash.clone(),
            hostname: hostname(),
            started_at,
            finished_at: Utc::now(),
            phases: outcomes,
            rollback,
            accounts_created: state.accounts_created,
            files_written: state.files_written,
            services: state.services,
            url,
            warnings,
            error: failure.as_ref().map(ToString::to_string),
            failure,
        }
    }

    /// `https://` once the certificate the vhost uses is in place.
    async fn public_url(&self) -> String {
        let (cert, _) = self.layout.tls_material(self.config.has_supplied_tls());
        let tls = match self.host.path_exists(&cert).await {
            Ok(exists) => exists,
            Err(e) => {
                debug!("Cannot check {}: {e}", cert.display());
                false
            }
        };
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{}/", self.config.domain)
    }
}

fn hostname() -> String {
    hostname::get().map_or_else(
        |_| String::from("localhost"),
        |name| name.to_string_lossy().into_owned(),
    )
}

impl std::fmt::Display for DeploymentReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success() { "succeeded" } else { "failed" };
        writeln!(f, "Deployment {status} on {} (run {})", self.hostname, self.run_id)?;
        writeln!(f, "  URL: {}", self.url)?;

        if !self.accounts_created.is_empty() {
            writeln!(f, "  Accounts created: {}", self.accounts_created.join(", "))?;
        }
        if !self.files_written.is_empty() {
            writeln!(f, "  Files written:")?;
            for path in &self.files_written {
                writeln!(f, "    - {}", path.display())?;
            }
        }
        if !self.services.is_empty() {
            writeln!(f, "  Services: {}", self.services.join(", "))?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "  Error: {error}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, PrivilegeError};
    use crate::host::fake::FakeHost;
    use crate::phases::testing::config;
    use crate::planner::PhaseStatus;
    use crate::probe::{EndpointCheck, MockHealthProbe};

    fn healthy_probe() -> MockHealthProbe {
        let mut probe = MockHealthProbe::new();
        probe.expect_check().returning(|url| EndpointCheck {
            url: url.to_string(),
            healthy: true,
            status_code: Some(200),
            response_time_ms: Some(2),
            error: None,
        });
        probe
    }

    #[tokio::test]
    async fn test_example_scenario() {
        let config = config();
        let host = FakeHost::with_sources();
        let probe = healthy_probe();

        let report = Orchestrator::new(&config, &host, &probe).deploy().await.unwrap();
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.url, "https://app.example.com/");
        assert_eq!(report.accounts_created, vec![String::from("webapp")]);
        assert!(report.services.contains(&String::from("webapp.service")));
        assert!(report.rollback.is_empty());

        let state = host.lock().clone();
        assert!(state.roles.contains_key("bar"));
        assert_eq!(state.databases.get("foo").map(String::as_str), Some("bar"));
        let backend: Vec<_> = state.listeners.iter().filter(|l| l.port == 8080).collect();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].address, "127.0.0.1");
        assert!(state.services.get("webapp.service").is_some_and(|s| s.active && s.enabled));
        assert!(
            state
                .files
                .contains_key(std::path::Path::new("/etc/letsencrypt/live/app.example.com/fullchain.pem"))
        );
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let config = config();
        let host = FakeHost::with_sources();
        let probe = healthy_probe();
        let orchestrator = Orchestrator::new(&config, &host, &probe);

        orchestrator.deploy().await.unwrap();
        host.clear_mutations();
        let report = orchestrator.deploy().await.unwrap();

        assert!(report.success());
        assert!(report.files_written.is_empty());
        assert!(report.accounts_created.is_empty());
        let updated: Vec<_> = report
            .phases
            .iter()
            .filter(|p| p.status != PhaseStatus::Skipped)
            .map(|p| p.kind.to_string())
            .collect();
        assert_eq!(updated, vec![String::from("database")]);
        assert_eq!(host.mutations(), vec![String::from("alter role bar password")]);
    }

    #[tokio::test]
    async fn test_invalid_config_touches_nothing() {
        let mut config = config();
        config.tls.cert_path = Some(PathBuf::from("/root/cert.pem"));
        let host = FakeHost::with_sources();
        let probe = MockHealthProbe::new();

        let err = Orchestrator::new(&config, &host, &probe).deploy().await.unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::TlsPairIncomplete)));
        assert!(host.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unprivileged_run_touches_nothing() {
        let config = config();
        let host = FakeHost::with_sources();
        host.lock().uid = 1000;
        let probe = MockHealthProbe::new();

        let err = Orchestrator::new(&config, &host, &probe).deploy().await.unwrap_err();
        assert!(matches!(err, DeployError::Privilege(PrivilegeError::NotRoot { .. })));
        assert_eq!(err.exit_code(), 1);
        assert!(host.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_phase_failure_is_reported() {
        let config = config();
        let host = FakeHost::with_sources();
        host.fail_on("build backend");
        let probe = MockHealthProbe::new();

        let report = Orchestrator::new(&config, &host, &probe).deploy().await.unwrap();
        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
        assert!(report.error.as_deref().is_some_and(|e| e.contains("Phase 'build' failed")));
        assert_eq!(report.url, "http://app.example.com/");
    }

    #[tokio::test]
    async fn test_health_only_touches_nothing() {
        let config = config();
        let host = FakeHost::with_sources();
        let probe = healthy_probe();

        let report = Orchestrator::new(&config, &host, &probe).health().await.unwrap();
        assert!(report.success());
        assert_eq!(report.phases.len(), 1);
        assert!(host.mutations().is_empty());
    }
}
