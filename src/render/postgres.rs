//! Edits to the PostgreSQL configuration files.
//!
//! Both functions return `None` when the file already has the desired
//! content, so callers can tell whether a restart is needed.

/// Access rules granting `user` password access to `db` over loopback.
#[must_use]
pub fn hba_rules(db: &str, user: &str) -> Vec<String> {
    ["127.0.0.1/32", "::1/128"]
        .iter()
        .map(|addr| format!("host    {db}    {user}    {addr}    md5"))
        .collect()
}

/// Adds each missing rule to `pg_hba.conf`, compared line-exact.
///
/// Rules go in front of the first existing `host` rule, because
/// PostgreSQL uses the first matching line and the distribution default
/// is `ident` for loopback.
#[must_use]
pub fn ensure_hba_rules(content: &str, rules: &[String]) -> Option<String> {
    let present = |rule: &str| content.lines().any(|line| line.trim() == rule);
    let missing: Vec<&String> = rules.iter().filter(|r| !present(r)).collect();
    if missing.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let insert_at = lines
        .iter()
        .position(|l| l.trim_start().starts_with("host"))
        .unwrap_or(lines.len());
    for (offset, rule) in missing.into_iter().enumerate() {
        lines.insert(insert_at + offset, rule.clone());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Some(out)
}

/// Pins `listen_addresses` to `localhost` in `postgresql.conf`.
///
/// Active settings with another value are commented out and the pinned line
/// is appended; a commented default does not count as set.
#[must_use]
pub fn restrict_listen_addresses(content: &str) -> Option<String> {
    const WANTED: &str = "listen_addresses = 'localhost'";

    let active: Vec<(usize, String)> = content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| listen_value(line).map(|v| (i, v)))
        .collect();

    // Last assignment wins in postgresql.conf.
    if active.len() == 1 && active[0].1 == "localhost" {
        return None;
    }

    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    for (i, _) in &active {
        lines[*i] = format!("#{}", lines[*i]);
    }
    lines.push(String::from(WANTED));

    let mut out = lines.join("\n");
    out.push('\n');
    Some(out)
}

/// Value of an uncommented `listen_addresses` line.
fn listen_value(line: &str) -> Option<String> {
    let line = line.trim();
    let rest = line.strip_prefix("listen_addresses")?;
    let rest = rest.trim_start().strip_prefix('=')?;
    let value = rest.split('#').next()?.trim();
    Some(value.trim_matches('\'').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_HBA: &str = "# TYPE  DATABASE  USER  ADDRESS  METHOD\n\
                               local   all   all   peer\n\
                               host    all   all   127.0.0.1/32   ident\n\
                               host    all   all   ::1/128        ident\n";

    #[test]
    fn test_hba_rules_inserted_before_host_lines() {
        let rules = hba_rules("foo", "bar");
        let updated = ensure_hba_rules(DEFAULT_HBA, &rules).unwrap();
        let lines: Vec<&str> = updated.lines().collect();

        assert_eq!(lines[2], "host    foo    bar    127.0.0.1/32    md5");
        assert_eq!(lines[3], "host    foo    bar    ::1/128    md5");
        assert_eq!(lines[4], "host    all   all   127.0.0.1/32   ident");
    }

    #[test]
    fn test_hba_rules_idempotent() {
        let rules = hba_rules("foo", "bar");
        let once = ensure_hba_rules(DEFAULT_HBA, &rules).unwrap();
        assert!(ensure_hba_rules(&once, &rules).is_none());
    }

    #[test]
    fn test_hba_rules_appended_without_host_lines() {
        let rules = hba_rules("foo", "bar");
        let updated = ensure_hba_rules("local all all peer\n", &rules).unwrap();
        assert!(updated.ends_with("::1/128    md5\n"));
    }

    #[test]
    fn test_listen_addresses_commented_default() {
        let conf = "#listen_addresses = 'localhost'\nmax_connections = 100\n";
        let updated = restrict_listen_addresses(conf).unwrap();
        assert!(updated.ends_with("listen_addresses = 'localhost'\n"));
        assert!(restrict_listen_addresses(&updated).is_none());
    }

    #[test]
    fn test_listen_addresses_wildcard_replaced() {
        let conf = "listen_addresses = '*'    # what IP address(es) to listen on\n";
        let updated = restrict_listen_addresses(conf).unwrap();
        let lines: Vec<&str> = updated.lines().collect();
        assert!(lines[0].starts_with("#listen_addresses = '*'"));
        assert_eq!(lines[1], "listen_addresses = 'localhost'");
    }
}
