//! Backend and frontend builds.
//!
//! A component is rebuilt unless a usable artifact is present and the stamp
//! next to its working copy records the digest of the current sources. The
//! stamp is written only after a successful build, so a failed build is
//! retried on the next run. Artifact selection is a pure function of the
//! file names in the output directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Phase, PhaseContext, PhaseReport, RunState};
use crate::error::{BuildError, Result};
use crate::host::{BuildStep, Component, FilePerms};
use crate::planner::PhaseKind;

/// Jar suffixes Maven plugins attach next to the real artifact.
const SECONDARY_JAR_SUFFIXES: [&str; 3] = ["-sources.jar", "-javadoc.jar", "-tests.jar"];

/// Prefix the shade plugin gives the unshaded jar.
const SHADE_LEFTOVER_PREFIX: &str = "original-";

/// Picks the single deployable jar among `names` found in `dir`.
///
/// # Errors
///
/// Returns [`BuildError::ArtifactMissing`] when no candidate remains and
/// [`BuildError::ArtifactAmbiguous`] when more than one does.
pub fn select_jar(dir: &Path, names: &[String]) -> std::result::Result<PathBuf, BuildError> {
    let mut candidates: Vec<&String> = names
        .iter()
        .filter(|name| name.ends_with(".jar"))
        .filter(|name| !name.starts_with(SHADE_LEFTOVER_PREFIX))
        .filter(|name| !SECONDARY_JAR_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .collect();
    candidates.sort();

    match candidates.as_slice() {
        [] => Err(BuildError::ArtifactMissing { dir: dir.to_path_buf() }),
        [only] => Ok(dir.join(only)),
        many => Err(BuildError::ArtifactAmbiguous {
            dir: dir.to_path_buf(),
            candidates: many.iter().map(|s| (*s).clone()).collect(),
        }),
    }
}

/// Directories a frontend build may write to, in order of preference.
#[must_use]
pub fn frontend_output_candidates(work_dir: &Path) -> [PathBuf; 2] {
    [work_dir.join("dist"), work_dir.join("build")]
}

/// Finds the backend jar in the working copy.
pub(super) async fn locate_jar(ctx: &PhaseContext<'_>) -> Result<PathBuf> {
    let target = ctx.layout.backend_work_dir.join("target");
    let names = ctx.host.list_files(&target).await?;
    Ok(select_jar(&target, &names)?)
}

/// Finds the built frontend in the working copy.
pub(super) async fn locate_frontend_output(ctx: &PhaseContext<'_>) -> Result<PathBuf> {
    let work_dir = &ctx.layout.frontend_work_dir;
    for candidate in frontend_output_candidates(work_dir) {
        if ctx.host.path_exists(&candidate.join("index.html")).await? {
            return Ok(candidate);
        }
    }
    Err(BuildError::ArtifactMissing {
        dir: work_dir.clone(),
    }
    .into())
}

/// Runs Maven and npm in the working copies.
pub struct BuildPhase;

#[async_trait]
impl Phase for BuildPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Build
    }

    async fn apply(&self, ctx: &PhaseContext<'_>, run: &mut RunState) -> Result<PhaseReport> {
        let layout = ctx.layout;
        let mut report = PhaseReport::new();

        let digest = source_digest(ctx, &layout.backend_work_dir).await?;
        let fresh = stamp_matches(ctx, &layout.backend_stamp, &digest).await?;
        let jar = match locate_jar(ctx).await {
            Ok(jar) if fresh => {
                debug!("Backend unchanged, reusing {}", jar.display());
                jar
            }
            previous => {
                build(ctx, Component::Backend, &layout.backend_work_dir).await?;
                let jar = locate_jar(ctx).await?;
                write_stamp(ctx, &layout.backend_stamp, &digest).await?;
                let message = format!("Built backend artifact {}", jar.display());
                if previous.is_ok() {
                    report.updated(message);
                } else {
                    report.created(message);
                }
                jar
            }
        };
        run.backend_artifact = Some(jar);

        let digest = source_digest(ctx, &layout.frontend_work_dir).await?;
        let fresh = stamp_matches(ctx, &layout.frontend_stamp, &digest).await?;
        let output = match locate_frontend_output(ctx).await {
            Ok(dir) if fresh => {
                debug!("Frontend unchanged, reusing {}", dir.display());
                dir
            }
            previous => {
                build(ctx, Component::Frontend, &layout.frontend_work_dir).await?;
                let dir = locate_frontend_output(ctx).await?;
                write_stamp(ctx, &layout.frontend_stamp, &digest).await?;
                let message = format!("Built frontend into {}", dir.display());
                if previous.is_ok() {
                    report.updated(message);
                } else {
                    report.created(message);
                }
                dir
            }
        };
        run.frontend_output = Some(output);

        Ok(report)
    }
}

async fn build(ctx: &PhaseContext<'_>, component: Component, dir: &Path) -> Result<()> {
    let step = BuildStep {
        component,
        dir: dir.to_path_buf(),
    };
    ctx.host.run_build(&step).await
}

async fn source_digest(ctx: &PhaseContext<'_>, work_dir: &Path) -> Result<String> {
    ctx.host.tree_digest(work_dir, &ctx.config.sources.exclude).await
}

/// True when `stamp` records `digest`. A missing stamp never matches.
async fn stamp_matches(ctx: &PhaseContext<'_>, stamp: &Path, digest: &str) -> Result<bool> {
    let recorded = ctx.host.read_file(stamp).await?;
    Ok(recorded.is_some_and(|body| String::from_utf8_lossy(&body).trim() == digest))
}

async fn write_stamp(ctx: &PhaseContext<'_>, stamp: &Path, digest: &str) -> Result<()> {
    ctx.host
        .write_file(stamp, format!("{digest}\n").as_bytes(), &FilePerms::root(0o644))
        .await
}

#[cfg(test)]
mod tests {
    use super::super::sources::SourcesPhase;
    use super::super::testing::Harness;
    use super::*;
    use crate::error::DeployError;
    use crate::planner::PhaseStatus;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_select_jar_ignores_secondary_jars() {
        let dir = Path::new("/w/target");
        let jar = select_jar(
            dir,
            &names(&[
                "app-1.0-sources.jar",
                "app-1.0.jar",
                "app-1.0-javadoc.jar",
                "original-app-1.0.jar",
                "app-1.0-tests.jar",
                "classes",
                "app-1.0.jar.sha1",
            ]),
        )
        .unwrap();
        assert_eq!(jar, PathBuf::from("/w/target/app-1.0.jar"));
    }

    #[test]
    fn test_select_jar_missing() {
        let err = select_jar(Path::new("/w/target"), &names(&["app-1.0-sources.jar"])).unwrap_err();
        assert!(matches!(err, BuildError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_select_jar_ambiguous_is_sorted() {
        let err = select_jar(Path::new("/w/target"), &names(&["b.jar", "a.jar"])).unwrap_err();
        match err {
            BuildError::ArtifactAmbiguous { candidates, .. } => {
                assert_eq!(candidates, names(&["a.jar", "b.jar"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_builds_then_reuses() {
        let mut harness = Harness::new();
        {
            let (ctx, run) = harness.parts();
            SourcesPhase.apply(&ctx, run).await.unwrap();
            let report = BuildPhase.apply(&ctx, run).await.unwrap();
            assert_eq!(report.status(), PhaseStatus::Created);
        }
        assert_eq!(
            harness.run.backend_artifact,
            Some(PathBuf::from("/opt/webapp/src/backend/target/app-1.0.jar"))
        );
        assert_eq!(
            harness.run.frontend_output,
            Some(PathBuf::from("/opt/webapp/src/frontend/dist"))
        );

        harness.run = RunState::default();
        harness.host.clear_mutations();
        let (ctx, run) = harness.parts();
        SourcesPhase.apply(&ctx, run).await.unwrap();
        let report = BuildPhase.apply(&ctx, run).await.unwrap();
        assert_eq!(report.status(), PhaseStatus::Skipped);
        assert!(harness.host.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_rebuilds_after_failed_build() {
        let mut harness = Harness::new();
        {
            let (ctx, run) = harness.parts();
            SourcesPhase.apply(&ctx, run).await.unwrap();
            BuildPhase.apply(&ctx, run).await.unwrap();
        }
        let jar_path = "/opt/webapp/src/backend/target/app-1.0.jar";
        let first_jar = harness.host.file_text(jar_path).unwrap();

        harness.host.lock().files.insert(
            PathBuf::from("/srv/backend/src/main/java/New.java"),
            b"class New {}".to_vec(),
        );
        harness.host.fail_on("build backend");
        harness.run = RunState::default();
        {
            let (ctx, run) = harness.parts();
            SourcesPhase.apply(&ctx, run).await.unwrap();
            let err = BuildPhase.apply(&ctx, run).await.unwrap_err();
            assert!(matches!(err, DeployError::Build(BuildError::ToolFailed { .. })));
        }

        // Sources are already mirrored, only the stamp can tell the jar is stale.
        harness.host.lock().fail_on = None;
        harness.host.clear_mutations();
        harness.run = RunState::default();
        let (ctx, run) = harness.parts();
        let sources = SourcesPhase.apply(&ctx, run).await.unwrap();
        let report = BuildPhase.apply(&ctx, run).await.unwrap();

        assert_eq!(sources.status(), PhaseStatus::Skipped);
        assert_eq!(report.status(), PhaseStatus::Updated);
        let mutations = harness.host.mutations();
        assert!(mutations.contains(&String::from("build backend")));
        assert!(!mutations.contains(&String::from("build frontend")));
        assert_ne!(harness.host.file_text(jar_path).unwrap(), first_jar);
    }

    #[tokio::test]
    async fn test_missing_stamp_forces_rebuild() {
        let mut harness = Harness::new();
        {
            let (ctx, run) = harness.parts();
            SourcesPhase.apply(&ctx, run).await.unwrap();
            BuildPhase.apply(&ctx, run).await.unwrap();
        }
        harness
            .host
            .lock()
            .files
            .remove(Path::new("/opt/webapp/src/.frontend.sha256"));
        harness.host.clear_mutations();
        harness.run = RunState::default();

        let (ctx, run) = harness.parts();
        let report = BuildPhase.apply(&ctx, run).await.unwrap();

        assert_eq!(report.status(), PhaseStatus::Updated);
        assert_eq!(
            harness.host.mutations(),
            vec![
                String::from("build frontend"),
                String::from("write /opt/webapp/src/.frontend.sha256"),
            ]
        );
    }

    #[tokio::test]
    async fn test_ambiguous_build_output_fails() {
        let mut harness = Harness::new();
        harness.host.lock().extra_jars = vec![String::from("other-2.0.jar")];
        let (ctx, run) = harness.parts();
        SourcesPhase.apply(&ctx, run).await.unwrap();

        let err = BuildPhase.apply(&ctx, run).await.unwrap_err();
        assert!(matches!(err, DeployError::Build(BuildError::ArtifactAmbiguous { .. })));
    }

    #[tokio::test]
    async fn test_build_tool_failure() {
        let mut harness = Harness::new();
        harness.host.fail_on("build frontend");
        let (ctx, run) = harness.parts();
        SourcesPhase.apply(&ctx, run).await.unwrap();

        let err = BuildPhase.apply(&ctx, run).await.unwrap_err();
        assert!(matches!(err, DeployError::Build(BuildError::ToolFailed { .. })));
        assert!(run.backend_artifact.is_some());
    }
}
