//! Artifact installation and permission hardening.

use async_trait::async_trait;
use tracing::debug;

use super::build::{locate_frontend_output, locate_jar};
use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::config::NGINX_GROUP;
use crate::error::Result;
use crate::host::{FilePerms, TreePerms};
use crate::planner::PhaseKind;

const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o640;

/// Left in place when the web root is mirrored; certbot answers challenges from it.
const ACME_DIR: &str = ".well-known";

/// Installs the jar and the frontend bundle.
pub struct DeployPhase;

#[async_trait]
impl Phase for DeployPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Deploy
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let host = ctx.host;
        let layout = ctx.layout;
        let user = &layout.service_user;
        let mut report = PhaseReport::new();

        let jar = match run.backend_artifact.clone() {
            Some(jar) => jar,
            None => locate_jar(ctx).await?,
        };
        let bundle = match run.frontend_output.clone() {
            Some(dir) => dir,
            None => locate_frontend_output(ctx).await?,
        };

        let app_perms = TreePerms {
            owner: user.clone(),
            group: user.clone(),
            dir_mode: DIR_MODE,
            file_mode: FILE_MODE,
        };
        let web_perms = TreePerms {
            owner: user.clone(),
            group: String::from(NGINX_GROUP),
            dir_mode: DIR_MODE,
            file_mode: FILE_MODE,
        };

        if host
            .ensure_dir(&layout.app_dir, &FilePerms::owned(DIR_MODE, user, user))
            .await?
        {
            report.created(format!("Created {}", layout.app_dir.display()));
        }

        let wanted = host.file_digest(&jar).await?;
        let installed = host.file_digest(&layout.jar_path).await?;
        if wanted.is_some() && wanted == installed {
            debug!("Installed jar matches {}", jar.display());
        } else {
            host.copy_file(&jar, &layout.jar_path, &FilePerms::owned(FILE_MODE, user, user))
                .await?;
            run.jar_changed = true;
            run.files_written.push(layout.jar_path.clone());
            let message = format!("Installed {}", layout.jar_path.display());
            if installed.is_some() {
                report.updated(message);
            } else {
                report.created(message);
            }
        }

        if host
            .ensure_dir(&layout.web_root, &FilePerms::owned(DIR_MODE, user, NGINX_GROUP))
            .await?
        {
            report.created(format!("Created {}", layout.web_root.display()));
        }
        let sync = host
            .mirror_tree(&bundle, &layout.web_root, &[String::from(ACME_DIR)])
            .await?;
        if sync.changed() {
            report.updated(format!("Published frontend to {} ({sync})", layout.web_root.display()));
        }

        let fixed = host.apply_tree_perms(&layout.app_dir, &app_perms).await?
            + host.apply_tree_perms(&layout.web_root, &web_perms).await?;
        if fixed > 0 {
            debug!("Hardened permissions on {fixed} entries");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::build::BuildPhase;
    use super::super::sources::SourcesPhase;
    use super::super::testing::Harness;
    use super::*;
    use crate::planner::PhaseStatus;
    use std::path::{Path, PathBuf};

    async fn prepare(harness: &mut Harness) {
        let (ctx, run) = harness.parts();
        SourcesPhase.apply(&ctx, run).await.unwrap();
        BuildPhase.apply(&ctx, run).await.unwrap();
    }

    #[tokio::test]
    async fn test_installs_with_hardened_perms() {
        let mut harness = Harness::new();
        prepare(&mut harness).await;
        let (ctx, run) = harness.parts();

        let report = DeployPhase.apply(&ctx, run).await.unwrap();
        assert_eq!(report.status(), PhaseStatus::Created);
        assert!(harness.run.jar_changed);

        let state = harness.host.lock().clone();
        assert!(state.files.contains_key(Path::new("/opt/webapp/app/webapp.jar")));
        assert_eq!(
            state.perms.get(Path::new("/opt/webapp/app/webapp.jar")),
            Some(&FilePerms::owned(0o640, "webapp", "webapp"))
        );
        assert_eq!(
            state.perms.get(Path::new("/var/www/webapp/index.html")),
            Some(&FilePerms::owned(0o640, "webapp", "nginx"))
        );
        assert_eq!(
            state.perms.get(Path::new("/var/www/webapp")),
            Some(&FilePerms::owned(0o750, "webapp", "nginx"))
        );
    }

    #[tokio::test]
    async fn test_unchanged_artifacts_are_skipped() {
        let mut harness = Harness::new();
        prepare(&mut harness).await;
        {
            let (ctx, run) = harness.parts();
            DeployPhase.apply(&ctx, run).await.unwrap();
        }
        harness.host.clear_mutations();
        harness.run = RunState::default();

        let (ctx, run) = harness.parts();
        let report = DeployPhase.apply(&ctx, run).await.unwrap();
        assert_eq!(report.status(), PhaseStatus::Skipped);
        assert!(!harness.run.jar_changed);
        assert!(harness.host.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_acme_challenges_survive_publish() {
        let mut harness = Harness::new();
        prepare(&mut harness).await;
        let token = PathBuf::from("/var/www/webapp/.well-known/acme-challenge/token");
        harness.host.lock().files.insert(token.clone(), b"proof".to_vec());

        let (ctx, run) = harness.parts();
        DeployPhase.apply(&ctx, run).await.unwrap();
        assert!(harness.host.lock().files.contains_key(&token));
    }
}
