//! TLS material and the HTTPS vhost.
//!
//! Caller-supplied material is installed into a managed directory.
//! Otherwise a certificate is requested from Let's Encrypt over the
//! HTTP-01 webroot challenge, which the HTTP vhost already serves.

use async_trait::async_trait;
use tracing::debug;

use super::services::{ensure_proxy_running, install_vhost};
use super::{Phase, PhaseContext, PhaseReport, RunState, install_file, report_write};
use crate::error::{ConfigError, Result};
use crate::host::{CertificateRequest, FilePerms, ServiceAction};
use crate::planner::PhaseKind;
use crate::render::{ProxyMode, render_renewal_hook};

/// Timer shipped with the certbot package.
pub const RENEW_TIMER: &str = "certbot-renew.timer";

/// Installs or obtains a certificate and switches Nginx to HTTPS.
pub struct TlsPhase;

#[async_trait]
impl Phase for TlsPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Tls
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let mut report = PhaseReport::new();
        let supplied = ctx.config.has_supplied_tls();

        if supplied {
            install_supplied(ctx, run, &mut report).await?;
        } else {
            obtain_certificate(ctx, run, &mut report).await?;
        }

        let (cert, key) = ctx.layout.tls_material(supplied);
        let vhost_changed = install_vhost(ctx, run, &mut report, &ProxyMode::Tls { cert, key }).await?;
        ensure_proxy_running(ctx, run, &mut report, vhost_changed).await?;

        Ok(report)
    }
}

/// Copies the caller's certificate (plus chain) and key into the managed directory.
async fn install_supplied(ctx: &PhaseContext<'_>, run: &mut RunState, report: &mut PhaseReport) -> Result<()> {
    let tls = &ctx.config.tls;
    let layout = ctx.layout;
    let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) else {
        return Err(ConfigError::TlsPairIncomplete.into());
    };

    let mut fullchain = read_required(ctx, cert_path).await?;
    if let Some(chain_path) = &tls.chain_path {
        if !fullchain.ends_with(b"\n") {
            fullchain.push(b'\n');
        }
        fullchain.extend(read_required(ctx, chain_path).await?);
    }
    let key = read_required(ctx, key_path).await?;

    if ctx.host.ensure_dir(&layout.tls_dir, &FilePerms::root(0o755)).await? {
        report.created(format!("Created {}", layout.tls_dir.display()));
    }

    for (path, contents, mode) in [(&layout.tls_fullchain, &fullchain, 0o644), (&layout.tls_key, &key, 0o600)] {
        if let Some(write) = install_file(ctx, run, path, contents, FilePerms::root(mode)).await? {
            run.compensate(write.compensation());
            report_write(report, &write);
        }
    }

    Ok(())
}

/// Requests a certificate unless one is already live, and sets up renewal.
async fn obtain_certificate(ctx: &PhaseContext<'_>, run: &mut RunState, report: &mut PhaseReport) -> Result<()> {
    let host = ctx.host;
    let layout = ctx.layout;
    let (cert, key) = layout.tls_material(false);

    if host.path_exists(&cert).await? && host.path_exists(&key).await? {
        debug!("Certificate for {} already present", ctx.config.domain);
    } else {
        let email = ctx
            .config
            .contact_email
            .clone()
            .ok_or(ConfigError::MissingContact)?;
        let request = CertificateRequest {
            domain: ctx.config.domain.clone(),
            email,
            webroot: layout.web_root.clone(),
        };
        host.request_certificate(&request).await?;
        report.created(format!("Obtained certificate for {}", ctx.config.domain));
    }

    let hook = render_renewal_hook();
    if let Some(write) = install_file(ctx, run, &layout.renewal_hook, hook.as_bytes(), FilePerms::root(0o755)).await? {
        run.compensate(write.compensation());
        report_write(report, &write);
    }

    let timer = host.service_state(RENEW_TIMER).await?;
    if !timer.enabled {
        host.service_action(ServiceAction::Enable, RENEW_TIMER).await?;
        report.updated(format!("Enabled {RENEW_TIMER}"));
    }
    if !timer.active {
        host.service_action(ServiceAction::Start, RENEW_TIMER).await?;
        report.updated(format!("Started {RENEW_TIMER}"));
    }
    run.track_service(RENEW_TIMER);

    Ok(())
}

async fn read_required(ctx: &PhaseContext<'_>, path: &std::path::Path) -> Result<Vec<u8>> {
    ctx.host.read_file(path).await?.ok_or_else(|| {
        ConfigError::PathUnavailable {
            path: path.to_path_buf(),
        }
        .into()
    })
}
