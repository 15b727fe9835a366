//! Text rendering for the files the orchestrator installs.
//!
//! Renderers are pure functions of the configuration and layout. Identical
//! input must yield byte-identical output.

mod env;
mod nginx;
mod postgres;
mod systemd;

pub use env::render_env_file;
pub use nginx::{ProxyMode, render_renewal_hook, render_vhost};
pub use postgres::{ensure_hba_rules, hba_rules, restrict_listen_addresses};
pub use systemd::render_unit;

/// First line of every generated file.
pub const MANAGED_HEADER: &str = "# Managed by almadeploy. Local changes are overwritten on the next run.";
