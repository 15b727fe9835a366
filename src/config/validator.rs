//! Configuration validation for deployment parameters.
//!
//! All checks here are pure: they look only at the configuration record.
//! Checks that need the host (paths, disk, ports, privilege) live in
//! [`crate::preflight`].

use crate::error::{ConfigError, DeployError, Result};
use tracing::debug;
use validator::ValidateEmail;

use super::spec::DeployConfig;

/// Longest identifier PostgreSQL accepts without truncation.
const MAX_SQL_IDENTIFIER_LEN: usize = 63;

/// Longest DNS name.
const MAX_DOMAIN_LEN: usize = 253;

/// Passwords shorter than this produce a warning.
const MIN_RECOMMENDED_PASSWORD_LEN: usize = 12;

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
    /// Typed error for this finding, when it has a dedicated variant.
    kind: Option<ConfigError>,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration and returns every finding.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_required(config, &mut result);
        Self::validate_identity(config, &mut result);
        Self::validate_database(config, &mut result);
        Self::validate_tls(config, &mut result);
        Self::validate_tuning(config, &mut result);

        result
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found, if any.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first = result.errors.remove(0);
            Err(DeployError::Config(first.into_config_error()))
        }
    }

    /// Required parameters must be present.
    fn validate_required(config: &DeployConfig, result: &mut ValidationResult) {
        let required = [
            ("domain", config.domain.is_empty()),
            ("db_name", config.database.name.is_empty()),
            ("db_user", config.database.user.is_empty()),
            ("db_password", config.database.password.is_empty()),
            ("backend_src", config.sources.backend.as_os_str().is_empty()),
            ("frontend_src", config.sources.frontend.as_os_str().is_empty()),
        ];

        for (name, missing) in required {
            if missing {
                result.push_typed(name, ConfigError::missing(name));
            }
        }
    }

    /// Domain, application name, and contact address.
    fn validate_identity(config: &DeployConfig, result: &mut ValidationResult) {
        if !config.domain.is_empty() && !is_valid_fqdn(&config.domain) {
            result.push(
                "domain",
                format!("Domain '{}' is not a valid fully qualified name", config.domain),
            );
        }

        if !is_valid_name(config.app_name()) {
            result.push(
                "app_name",
                format!(
                    "App name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.app_name()
                ),
            );
        }

        if let Some(email) = &config.contact_email {
            if !email.validate_email() {
                result.push("contact_email", format!("'{email}' is not a valid email address"));
            }
        }
    }

    /// Database identifiers and password.
    fn validate_database(config: &DeployConfig, result: &mut ValidationResult) {
        let db = &config.database;

        if !db.name.is_empty() && !is_sql_identifier(&db.name) {
            result.push(
                "db_name",
                format!("Database name '{}' must match [a-z_][a-z0-9_]* (max 63)", db.name),
            );
        }
        if !db.user.is_empty() && !is_sql_identifier(&db.user) {
            result.push(
                "db_user",
                format!("Database user '{}' must match [a-z_][a-z0-9_]* (max 63)", db.user),
            );
        }
        if db.user == "postgres" {
            result.push("db_user", String::from("Refusing to manage the 'postgres' superuser"));
        }
        if !db.password.is_empty() && db.password.chars().count() < MIN_RECOMMENDED_PASSWORD_LEN {
            result.warnings.push(format!(
                "db_password: shorter than {MIN_RECOMMENDED_PASSWORD_LEN} characters"
            ));
        }
    }

    /// TLS pairing and the certificate contact rule.
    fn validate_tls(config: &DeployConfig, result: &mut ValidationResult) {
        let tls = &config.tls;

        match (tls.cert_path.is_some(), tls.key_path.is_some()) {
            (true, false) | (false, true) => {
                result.push_typed("tls_cert_path", ConfigError::TlsPairIncomplete);
            }
            (false, false) => {
                if tls.chain_path.is_some() {
                    result.push(
                        "tls_chain_path",
                        String::from("A chain is only accepted together with a certificate and key"),
                    );
                }
                if config.contact_email.as_deref().is_none_or(str::is_empty) {
                    result.push_typed("contact_email", ConfigError::MissingContact);
                }
            }
            (true, true) => {}
        }
    }

    /// Optional tuning values.
    fn validate_tuning(config: &DeployConfig, result: &mut ValidationResult) {
        let port = config.app.port;
        if port == 0 || port == 80 || port == 443 {
            result.push(
                "app.port",
                format!("Application port {port} collides with the reverse proxy"),
            );
        }

        if config.health.attempts == 0 {
            result.push("health.attempts", String::from("Health check needs at least 1 attempt"));
        }
        if !config.health.path.starts_with('/') {
            result.push("health.path", format!("Health path must start with '/': {}", config.health.path));
        }
        if !config.app.api_prefix.starts_with('/') {
            result.push(
                "app.api_prefix",
                format!("API prefix must start with '/': {}", config.app.api_prefix),
            );
        }
        for (field, value) in [
            ("app.api_prefix", &config.app.api_prefix),
            ("health.path", &config.health.path),
            ("app.memory_max", &config.app.memory_max),
            ("app.java_opts", &config.app.java_opts),
        ] {
            if has_directive_breaking_chars(value) {
                result.push(
                    field,
                    format!("{field} must not contain control characters, ';', '{{' or '}}'"),
                );
            }
        }
        if config.firewall.services.is_empty() {
            result
                .warnings
                .push(String::from("firewall.services is empty; every service will be closed"));
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn push(&mut self, field: &str, message: String) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message,
            kind: None,
        });
    }

    fn push_typed(&mut self, field: &str, error: ConfigError) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: error.to_string(),
            kind: Some(error),
        });
    }
}

impl ValidationError {
    /// Converts the finding into the error reported to the caller.
    #[must_use]
    pub fn into_config_error(self) -> ConfigError {
        match self.kind {
            Some(kind) => kind,
            None => ConfigError::validation(self.message, self.field),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
        && name.len() <= 32
}

/// Characters that would end or nest a directive in the rendered vhost or unit.
fn has_directive_breaking_chars(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_control() || matches!(c, ';' | '{' | '}'))
}

/// SQL-safe identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_SQL_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Fully qualified domain name with at least two labels.
fn is_valid_fqdn(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }) && labels
        .last()
        .is_some_and(|tld| tld.chars().any(|c| c.is_ascii_alphabetic()))
}
