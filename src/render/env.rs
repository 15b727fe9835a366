//! Environment file read by the backend unit.

use crate::config::{DeployConfig, HostLayout};
use std::fmt::Write as _;

use super::MANAGED_HEADER;

/// PostgreSQL port on the loopback interface.
const PG_PORT: u16 = 5432;

/// Renders `KEY=value` lines with the database connection parameters.
#[must_use]
pub fn render_env_file(config: &DeployConfig, layout: &HostLayout) -> String {
    let db = &config.database;
    let jdbc = format!("jdbc:postgresql://localhost:{PG_PORT}/{}", db.name);

    let entries: [(&str, &str); 11] = [
        ("APP_NAME", &layout.app_name),
        ("APP_DOMAIN", &config.domain),
        ("DB_HOST", "localhost"),
        ("DB_PORT", "5432"),
        ("DB_NAME", &db.name),
        ("DB_USER", &db.user),
        ("DB_PASSWORD", &db.password),
        ("SPRING_DATASOURCE_URL", &jdbc),
        ("SPRING_DATASOURCE_USERNAME", &db.user),
        ("SPRING_DATASOURCE_PASSWORD", &db.password),
        ("JAVA_OPTS", &config.app.java_opts),
    ];

    let mut out = String::new();
    let _ = writeln!(out, "{MANAGED_HEADER}");
    for (key, value) in entries {
        let _ = writeln!(out, "{key}={}", quote_value(value));
    }
    out
}

/// Quotes a value for a systemd `EnvironmentFile`.
fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@,+=%".contains(c));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}
