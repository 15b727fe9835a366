//! Environment file, systemd unit and Nginx vhost; service activation.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::{NGINX_UNIT, Phase, PhaseContext, PhaseReport, RunState, install_file, report_write};
use crate::error::Result;
use crate::host::{FilePerms, ServiceAction};
use crate::planner::{Compensation, PhaseKind};
use crate::render::{ProxyMode, render_env_file, render_unit, render_vhost};

/// Renders and activates the backend unit and the reverse proxy.
pub struct ServicesPhase;

#[async_trait]
impl Phase for ServicesPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Services
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let host = ctx.host;
        let layout = ctx.layout;
        let user = &layout.service_user;
        let unit = &layout.unit_name;
        let mut report = PhaseReport::new();

        if host
            .ensure_dir(&layout.env_dir, &FilePerms::owned(0o750, "root", user))
            .await?
        {
            report.created(format!("Created {}", layout.env_dir.display()));
        }

        let env = render_env_file(ctx.config, layout);
        let env_write = install_file(
            ctx,
            run,
            &layout.env_file,
            env.as_bytes(),
            FilePerms::owned(0o640, "root", user),
        )
        .await?;
        if let Some(write) = &env_write {
            run.compensate(write.compensation());
            report_write(&mut report, write);
        }

        let unit_body = render_unit(ctx.config, layout);
        let unit_write = install_file(ctx, run, &layout.unit_file, unit_body.as_bytes(), FilePerms::root(0o644)).await?;
        if let Some(write) = &unit_write {
            run.compensate(Compensation::DaemonReload);
            run.compensate(write.compensation());
            report_write(&mut report, write);
            host.daemon_reload().await?;
        }

        let state = host.service_state(unit).await?;
        if !state.enabled {
            host.service_action(ServiceAction::Enable, unit).await?;
            report.updated(format!("Enabled {unit}"));
        }
        if !state.active {
            host.service_action(ServiceAction::Start, unit).await?;
            run.compensate(Compensation::StopService { unit: unit.clone() });
            report.updated(format!("Started {unit}"));
        } else if env_write.is_some() || unit_write.is_some() || run.jar_changed {
            host.service_action(ServiceAction::Restart, unit).await?;
            report.updated(format!("Restarted {unit}"));
        } else {
            debug!("{unit} is running the current release");
        }
        run.track_service(unit);

        let mode = proxy_mode(ctx).await?;
        let vhost_changed = install_vhost(ctx, run, &mut report, &mode).await?;
        ensure_proxy_running(ctx, run, &mut report, vhost_changed).await?;

        Ok(report)
    }
}

/// TLS vhost when certificate and key are already in place, HTTP otherwise.
pub(super) async fn proxy_mode(ctx: &PhaseContext<'_>) -> Result<ProxyMode> {
    let (cert, key) = ctx.layout.tls_material(ctx.config.has_supplied_tls());
    if ctx.host.path_exists(&cert).await? && ctx.host.path_exists(&key).await? {
        Ok(ProxyMode::Tls { cert, key })
    } else {
        Ok(ProxyMode::Http)
    }
}

/// Installs the vhost for `mode` and validates it with `nginx -t`.
///
/// A rejected configuration is replaced by the previous file before the
/// error is returned. Returns true if the vhost changed.
pub(super) async fn install_vhost(
    ctx: &PhaseContext<'_>,
    run: &mut RunState,
    report: &mut PhaseReport,
    mode: &ProxyMode,
) -> Result<bool> {
    let body = render_vhost(ctx.config, ctx.layout, mode);
    let path = &ctx.layout.nginx_conf;

    let Some(write) = install_file(ctx, run, path, body.as_bytes(), FilePerms::root(0o644)).await? else {
        debug!("Vhost {} is current", path.display());
        return Ok(false);
    };

    if let Err(e) = ctx.host.test_proxy_config().await {
        warn!("Nginx rejected {}, restoring the previous file", path.display());
        if let Err(restore) = write.compensation().apply(ctx.host).await {
            error!("Failed to restore {}: {restore}", path.display());
        }
        run.files_written.retain(|p| p != path);
        return Err(e);
    }

    run.compensate(Compensation::ReloadService {
        unit: String::from(NGINX_UNIT),
    });
    run.compensate(write.compensation());
    report_write(report, &write);
    Ok(true)
}

/// Enables and starts Nginx, or reloads it when its configuration changed.
pub(super) async fn ensure_proxy_running(
    ctx: &PhaseContext<'_>,
    run: &mut RunState,
    report: &mut PhaseReport,
    config_changed: bool,
) -> Result<()> {
    let host = ctx.host;
    let state = host.service_state(NGINX_UNIT).await?;

    if !state.enabled {
        host.service_action(ServiceAction::Enable, NGINX_UNIT).await?;
        report.updated("Enabled nginx");
    }
    if !state.active {
        host.service_action(ServiceAction::Start, NGINX_UNIT).await?;
        report.updated("Started nginx");
    } else if config_changed {
        host.service_action(ServiceAction::Reload, NGINX_UNIT).await?;
        report.updated("Reloaded nginx");
    }
    run.track_service(NGINX_UNIT);

    Ok(())
}
