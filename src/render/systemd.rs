//! Systemd unit for the backend service.

use crate::config::{DeployConfig, HostLayout};
use std::fmt::Write as _;

use super::MANAGED_HEADER;

/// Java launcher installed by `java-17-openjdk`.
const JAVA_BIN: &str = "/usr/bin/java";

/// Renders the backend unit file.
///
/// The process binds loopback only; Nginx is the sole public entry point.
#[must_use]
pub fn render_unit(config: &DeployConfig, layout: &HostLayout) -> String {
    let app = &config.app;
    let mut out = String::new();

    let _ = writeln!(out, "{MANAGED_HEADER}");
    let _ = writeln!(out, "[Unit]");
    let _ = writeln!(out, "Description={} backend", layout.app_name);
    let _ = writeln!(out, "After=network-online.target postgresql.service");
    let _ = writeln!(out, "Wants=network-online.target");
    let _ = writeln!(out, "Requires=postgresql.service");
    let _ = writeln!(out);
    let _ = writeln!(out, "[Service]");
    let _ = writeln!(out, "Type=simple");
    let _ = writeln!(out, "User={}", layout.service_user);
    let _ = writeln!(out, "Group={}", layout.service_user);
    let _ = writeln!(out, "WorkingDirectory={}", layout.app_dir.display());
    let _ = writeln!(out, "EnvironmentFile={}", layout.env_file.display());
    let _ = writeln!(out, "Environment=SERVER_PORT={}", app.port);
    let _ = writeln!(out, "Environment=SERVER_ADDRESS=127.0.0.1");
    let _ = writeln!(out, "ExecStart={JAVA_BIN} $JAVA_OPTS -jar {}", layout.jar_path.display());
    let _ = writeln!(out, "SuccessExitStatus=143");
    let _ = writeln!(out, "Restart=on-failure");
    let _ = writeln!(out, "RestartSec={}", app.restart_sec);
    let _ = writeln!(out, "LimitNOFILE={}", app.limit_nofile);
    let _ = writeln!(out, "MemoryMax={}", app.memory_max);
    let _ = writeln!(out, "NoNewPrivileges=true");
    let _ = writeln!(out, "PrivateTmp=true");
    let _ = writeln!(out, "ProtectSystem=full");
    let _ = writeln!(out, "ProtectHome=true");
    let _ = writeln!(out);
    let _ = writeln!(out, "[Install]");
    let _ = writeln!(out, "WantedBy=multi-user.target");

    out
}
