//! Planning and execution of deployment runs.
//!
//! A [`DeploymentPlan`] fixes which phases run and in what order; the
//! [`PlanExecutor`] runs them and rolls back through [`Compensation`]s when
//! one fails.

mod compensation;
mod executor;
mod plan;

pub use compensation::Compensation;
pub use executor::{ExecutionResult, PhaseOutcome, PhaseStatus, PlanExecutor, RollbackStep};
pub use plan::{DeploymentPlan, PhaseKind};
