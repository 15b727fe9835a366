//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// almadeploy - Provision a Java + SPA stack on an AlmaLinux host.
#[derive(Parser, Debug)]
#[command(name = "almadeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "ALMADEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Append-only log file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Deployment parameters.
    #[command(flatten)]
    pub params: DeployArgs,

    /// Subcommand to execute (defaults to `deploy`).
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Deployment parameters; each one overrides the config file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct DeployArgs {
    /// Fully qualified domain name to serve.
    #[arg(long, global = true)]
    pub domain: Option<String>,

    /// Contact email for the certificate authority.
    #[arg(long, global = true)]
    pub email: Option<String>,

    /// Database name.
    #[arg(long, global = true)]
    pub db_name: Option<String>,

    /// Database role.
    #[arg(long, global = true)]
    pub db_user: Option<String>,

    /// Database role password (also read from `ALMADEPLOY_DB_PASSWORD`).
    #[arg(long, global = true)]
    pub db_password: Option<String>,

    /// Backend (Maven) source directory.
    #[arg(long, global = true)]
    pub backend_src: Option<PathBuf>,

    /// Frontend (npm) source directory.
    #[arg(long, global = true)]
    pub frontend_src: Option<PathBuf>,

    /// Application name used for the account, unit and paths.
    #[arg(long, global = true)]
    pub app_name: Option<String>,

    /// TLS certificate (requires `--tls-key-path`).
    #[arg(long, global = true)]
    pub tls_cert_path: Option<PathBuf>,

    /// TLS private key (requires `--tls-cert-path`).
    #[arg(long, global = true)]
    pub tls_key_path: Option<PathBuf>,

    /// TLS intermediate chain, appended to the certificate.
    #[arg(long, global = true)]
    pub tls_chain_path: Option<PathBuf>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run every phase against this host.
    Deploy,

    /// Validate the configuration and run the pre-flight checks.
    Validate,

    /// Show the ordered phase list and the derived host layout.
    Plan,

    /// Only poll the backend health endpoint.
    Health,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The command to run.
    #[must_use]
    pub fn action(&self) -> Commands {
        self.command.unwrap_or(Commands::Deploy)
    }

    /// Flag values as configuration overrides.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        let p = &self.params;
        ConfigOverrides {
            domain: p.domain.clone(),
            email: p.email.clone(),
            db_name: p.db_name.clone(),
            db_user: p.db_user.clone(),
            db_password: p.db_password.clone(),
            backend_src: p.backend_src.clone(),
            frontend_src: p.frontend_src.clone(),
            app_name: p.app_name.clone(),
            tls_cert_path: p.tls_cert_path.clone(),
            tls_key_path: p.tls_key_path.clone(),
            tls_chain_path: p.tls_chain_path.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_deploy() {
        let cli = Cli::try_parse_from(["almadeploy", "--domain", "app.example.com"]).unwrap();
        assert_eq!(cli.action(), Commands::Deploy);
        assert_eq!(cli.overrides().domain.as_deref(), Some("app.example.com"));
    }

    #[test]
    fn test_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "almadeploy",
            "validate",
            "--db-name",
            "foo",
            "--db-user",
            "bar",
            "--backend-src",
            "/srv/backend",
            "--output",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.action(), Commands::Validate);
        assert_eq!(cli.output, OutputFormat::Json);
        let overrides = cli.overrides();
        assert_eq!(overrides.db_name.as_deref(), Some("foo"));
        assert_eq!(overrides.db_user.as_deref(), Some("bar"));
        assert_eq!(overrides.backend_src, Some(PathBuf::from("/srv/backend")));
        assert!(overrides.email.is_none());
    }
}
