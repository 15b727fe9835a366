// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![warn(missing_docs)]                // Public items should be documented

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::too_many_arguments)]
#![warn(clippy::cognitive_complexity)]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # almadeploy
//!
//! Idempotent, ordered provisioning of a Java (Maven) backend and a
//! JavaScript (npm) single-page frontend on a fresh AlmaLinux host, fronted
//! by Nginx with TLS and backed by PostgreSQL.
//!
//! ## Overview
//!
//! A run validates its configuration, checks the host (root, sources, disk,
//! ports), then executes ten phases strictly in order:
//!
//! 1. firewall
//! 2. dependencies
//! 3. database
//! 4. accounts
//! 5. sources
//! 6. build
//! 7. deploy
//! 8. services
//! 9. tls
//! 10. health check
//!
//! Each phase first asks whether its target state already holds and only
//! then mutates, so a second run against a converged host changes nothing.
//! Mutating phases register compensations; the first fatal failure replays
//! them in reverse.
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and derived host paths
//! - [`host`]: Typed queries and mutations against the target host
//! - [`render`]: Unit, environment, vhost and `PostgreSQL` file rendering
//! - [`phases`]: The ten provisioning phases
//! - [`planner`]: Plan, executor and compensations
//! - [`preflight`]: Checks run before anything is touched
//! - [`probe`]: HTTP health probing
//! - [`orchestrator`]: Top-level driver producing the deployment summary
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! domain: app.example.com
//! contact_email: ops@example.com
//! database:
//!   name: foo
//!   user: bar
//! sources:
//!   backend: /srv/backend
//!   frontend: /srv/frontend
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod phases;
pub mod planner;
pub mod preflight;
pub mod probe;
pub mod render;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig, HostLayout};
pub use error::{DeployError, Result};
pub use host::{Host, SystemHost};
pub use orchestrator::{DeploymentReport, Orchestrator, ValidationReport};
pub use planner::{DeploymentPlan, PhaseKind, PlanExecutor};
pub use preflight::{Preflight, PreflightReport};
pub use probe::{HealthProbe, HttpHealthProbe};
