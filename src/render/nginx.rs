//! Nginx virtual host for the application.
//!
//! Two shapes exist: HTTP-only (used until TLS material is installed, so the
//! ACME challenge can be answered) and TLS, which redirects port 80.

use crate::config::{DeployConfig, HostLayout};
use std::fmt::Write as _;
use std::path::PathBuf;

use super::MANAGED_HEADER;

/// Which vhost shape to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    /// Plain HTTP on port 80.
    Http,
    /// HTTPS on 443 with an HTTP redirect.
    Tls {
        /// Certificate chain.
        cert: PathBuf,
        /// Private key.
        key: PathBuf,
    },
}

/// Renders the vhost for `mode`.
#[must_use]
pub fn render_vhost(config: &DeployConfig, layout: &HostLayout, mode: &ProxyMode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{MANAGED_HEADER}");

    match mode {
        ProxyMode::Http => {
            let _ = writeln!(out, "server {{");
            listen_http(&mut out);
            let _ = writeln!(out, "    server_name {};", config.domain);
            let _ = writeln!(out);
            acme_location(&mut out, layout);
            app_locations(&mut out, config, layout);
            let _ = writeln!(out, "}}");
        }
        ProxyMode::Tls { cert, key } => {
            let _ = writeln!(out, "server {{");
            listen_http(&mut out);
            let _ = writeln!(out, "    server_name {};", config.domain);
            let _ = writeln!(out);
            acme_location(&mut out, layout);
            let _ = writeln!(out, "    location / {{");
            let _ = writeln!(out, "        return 301 https://$host$request_uri;");
            let _ = writeln!(out, "    }}");
            let _ = writeln!(out, "}}");
            let _ = writeln!(out);
            let _ = writeln!(out, "server {{");
            let _ = writeln!(out, "    listen 443 ssl http2;");
            let _ = writeln!(out, "    listen [::]:443 ssl http2;");
            let _ = writeln!(out, "    server_name {};", config.domain);
            let _ = writeln!(out);
            let _ = writeln!(out, "    ssl_certificate {};", cert.display());
            let _ = writeln!(out, "    ssl_certificate_key {};", key.display());
            let _ = writeln!(out, "    ssl_protocols TLSv1.2 TLSv1.3;");
            let _ = writeln!(out, "    ssl_prefer_server_ciphers off;");
            let _ = writeln!(out, "    ssl_session_cache shared:SSL:10m;");
            let _ = writeln!(out, "    ssl_session_timeout 1d;");
            let _ = writeln!(
                out,
                "    add_header Strict-Transport-Security \"max-age=31536000\" always;"
            );
            let _ = writeln!(out);
            app_locations(&mut out, config, layout);
            let _ = writeln!(out, "}}");
        }
    }

    out
}

/// Deploy hook run by certbot after a renewal.
#[must_use]
pub fn render_renewal_hook() -> String {
    format!("#!/bin/sh\n{MANAGED_HEADER}\nsystemctl reload nginx\n")
}

fn listen_http(out: &mut String) {
    let _ = writeln!(out, "    listen 80;");
    let _ = writeln!(out, "    listen [::]:80;");
}

fn acme_location(out: &mut String, layout: &HostLayout) {
    let _ = writeln!(out, "    location ^~ /.well-known/acme-challenge/ {{");
    let _ = writeln!(out, "        root {};", layout.web_root.display());
    let _ = writeln!(out, "        default_type \"text/plain\";");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);
}

fn app_locations(out: &mut String, config: &DeployConfig, layout: &HostLayout) {
    let _ = writeln!(out, "    root {};", layout.web_root.display());
    let _ = writeln!(out, "    index index.html;");
    let _ = writeln!(out, "    client_max_body_size 10m;");
    let _ = writeln!(out);
    let _ = writeln!(out, "    location {} {{", config.app.api_prefix);
    let _ = writeln!(out, "        proxy_pass http://127.0.0.1:{};", config.app.port);
    let _ = writeln!(out, "        proxy_http_version 1.1;");
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
    let _ = writeln!(out, "        proxy_read_timeout 60s;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        try_files $uri $uri/ /index.html;");
    let _ = writeln!(out, "    }}");
}
