//! Parsers for host tool output.
//!
//! All string inspection of `rpm`, `firewall-cmd`, `ss` and `psql` output
//! lives here so it can be tested without the tools.

use super::Listener;
use std::collections::BTreeSet;

/// Packages reported missing by `rpm -q <names...>`.
///
/// `rpm` prints one line per argument; missing ones read
/// `package <name> is not installed`.
#[must_use]
pub fn missing_packages(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("package ")
                .and_then(|rest| rest.strip_suffix(" is not installed"))
                .map(str::to_string)
        })
        .collect()
}

/// Service names from `firewall-cmd --permanent --list-services`.
#[must_use]
pub fn parse_firewall_services(stdout: &str) -> BTreeSet<String> {
    stdout.split_whitespace().map(str::to_string).collect()
}

/// Listeners from `ss -H -ltnp`.
///
/// Columns: state, recv-q, send-q, local address, peer address, process.
#[must_use]
pub fn parse_listeners(stdout: &str) -> Vec<Listener> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let local = cols.nth(3)?;
            let (address, port) = local.rsplit_once(':')?;
            let port = port.parse::<u16>().ok()?;
            let process = line
                .find("users:((")
                .and_then(|idx| listener_process(&line[idx..]));
            Some(Listener {
                port,
                address: address.to_string(),
                process,
            })
        })
        .collect()
}

/// Extracts the first process name from an `ss` users column,
/// e.g. `users:(("nginx",pid=812,fd=6))`.
#[must_use]
pub fn listener_process(users: &str) -> Option<String> {
    let start = users.find("((\"")? + 3;
    let rest = &users[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Interprets a single-value `psql -tA` result.
#[must_use]
pub fn parse_psql_bool(stdout: &str) -> bool {
    matches!(stdout.trim(), "1" | "t" | "true")
}
