//! Deployment plan types and construction.
//!
//! A plan is the fixed, ordered list of phases plus the identity of the run.
//! It is built once per process and never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Identifier of this run, for correlating log lines.
    pub run_id: Uuid,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Phases in execution order.
    pub phases: Vec<PhaseKind>,
}

/// The ten deployment phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Reconcile the firewall allow-list.
    Firewall,
    /// Install runtime dependencies.
    Dependencies,
    /// Provision the database cluster, role and schema.
    Database,
    /// Create the service account.
    Accounts,
    /// Mirror source trees into the working copy.
    Sources,
    /// Build backend and frontend.
    Build,
    /// Install artifacts with hardened permissions.
    Deploy,
    /// Render env file, unit and vhost; activate services.
    Services,
    /// Install or obtain TLS material.
    Tls,
    /// Poll the backend health endpoint.
    HealthCheck,
}

impl PhaseKind {
    /// Every phase, in execution order.
    pub const ALL: [Self; 10] = [
        Self::Firewall,
        Self::Dependencies,
        Self::Database,
        Self::Accounts,
        Self::Sources,
        Self::Build,
        Self::Deploy,
        Self::Services,
        Self::Tls,
        Self::HealthCheck,
    ];

    /// 1-based position in the sequence.
    #[must_use]
    pub const fn number(self) -> usize {
        self as usize + 1
    }

    /// One-line description for plan listings.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Firewall => "Reconcile firewalld services to the allow-list",
            Self::Dependencies => "Install missing runtime packages",
            Self::Database => "Initialize PostgreSQL, ensure role, database and access rules",
            Self::Accounts => "Create the application service account",
            Self::Sources => "Mirror backend and frontend sources into the working copy",
            Self::Build => "Build the backend jar and the frontend bundle",
            Self::Deploy => "Install artifacts with hardened ownership and modes",
            Self::Services => "Render env file, systemd unit and Nginx vhost; activate",
            Self::Tls => "Install supplied TLS material or request a certificate",
            Self::HealthCheck => "Poll the backend health endpoint",
        }
    }
}

impl DeploymentPlan {
    /// Creates the full ten-phase plan.
    #[must_use]
    pub fn new(config_hash: &str) -> Self {
        Self::with_phases(config_hash, PhaseKind::ALL.to_vec())
    }

    /// Creates a plan that only runs the health check.
    #[must_use]
    pub fn health_only(config_hash: &str) -> Self {
        Self::with_phases(config_hash, vec![PhaseKind::HealthCheck])
    }

    fn with_phases(config_hash: &str, mut phases: Vec<PhaseKind>) -> Self {
        phases.sort();
        phases.dedup();
        Self {
            created_at: Utc::now(),
            run_id: Uuid::new_v4(),
            config_hash: config_hash.to_string(),
            phases,
        }
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Returns the number of phases.
    #[must_use]
    pub const fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// Short run id for display.
    #[must_use]
    pub fn short_run_id(&self) -> String {
        self.run_id.simple().to_string().chars().take(8).collect()
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Firewall => "firewall",
            Self::Dependencies => "dependencies",
            Self::Database => "database",
            Self::Accounts => "accounts",
            Self::Sources => "sources",
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Services => "services",
            Self::Tls => "tls",
            Self::HealthCheck => "health check",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.phases.is_empty() {
            return write!(f, "No phases planned");
        }

        writeln!(f, "Deployment Plan ({} phases):", self.phases.len())?;
        for phase in &self.phases {
            writeln!(f, "  {:>2}. {:<13} {}", phase.number(), phase.to_string(), phase.description())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_plan_order() {
        let plan = DeploymentPlan::new("abc");
        assert_eq!(plan.phase_count(), 10);
        assert_eq!(plan.phases.first(), Some(&PhaseKind::Firewall));
        assert_eq!(plan.phases.last(), Some(&PhaseKind::HealthCheck));
        for (i, phase) in plan.phases.iter().enumerate() {
            assert_eq!(phase.number(), i + 1);
        }
    }

    #[test]
    fn test_health_only_plan() {
        let plan = DeploymentPlan::health_only("abc");
        assert_eq!(plan.phases, vec![PhaseKind::HealthCheck]);
    }

    #[test]
    fn test_display_lists_phases() {
        let text = DeploymentPlan::new("abc").to_string();
        assert!(text.starts_with("Deployment Plan (10 phases):"));
        assert!(text.contains(" 1. firewall"));
        assert!(text.contains("10. health check"));
    }

    #[test]
    fn test_short_run_id() {
        assert_eq!(DeploymentPlan::new("abc").short_run_id().len(), 8);
    }
}
