//! [`Host`] implementation for AlmaLinux.
//!
//! Package, firewall, service, database and account operations shell out to
//! the distribution tools; filesystem operations use the standard library
//! directly, with tree walks moved onto the blocking pool.

use super::parse;
use super::{
    BuildStep, CertificateRequest, CommandRunner, CommandSpec, DiskSpace, FilePerms, Host,
    Listener, ServiceAccount, ServiceAction, ServiceState, SyncReport, TreePerms, is_excluded,
};
use crate::error::{BuildError, DeployError, ResourceError, Result};
use async_trait::async_trait;
use nix::unistd::{Group, Uid, User};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Production host backed by the local system tools.
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    runner: CommandRunner,
}

impl SystemHost {
    /// Creates a new system host.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            runner: CommandRunner::new(),
        }
    }

    /// Runs SQL as the `postgres` superuser and returns stdout.
    async fn psql(&self, sql: String) -> Result<String> {
        let spec = CommandSpec::new("runuser")
            .args(["-u", "postgres", "--", "psql", "-X", "-q", "-tA", "-v", "ON_ERROR_STOP=1"])
            .with_cwd("/tmp")
            .with_stdin(sql);
        let output = self.runner.run(&spec).await?;
        Ok(output.stdout)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        let spec = CommandSpec::new("systemctl").args(args.iter().copied());
        self.runner.run(&spec).await?;
        Ok(())
    }

    async fn firewall_cmd(&self, arg: String) -> Result<String> {
        let spec = CommandSpec::new("firewall-cmd").arg("--permanent").arg(arg);
        let output = self.runner.run(&spec).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl Host for SystemHost {
    async fn effective_uid(&self) -> u32 {
        Uid::effective().as_raw()
    }

    async fn available_space(&self, path: &Path) -> Result<DiskSpace> {
        let probe = nearest_existing(path);
        let probe = fs::canonicalize(&probe).unwrap_or(probe);
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| probe.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskSpace {
                mount: disk.mount_point().display().to_string(),
                available_bytes: disk.available_space(),
            })
            .ok_or_else(|| ResourceError::UnknownFilesystem { path: probe.clone() }.into())
    }

    async fn listeners(&self) -> Result<Vec<Listener>> {
        let output = self
            .runner
            .run(&CommandSpec::new("ss").arg("-H").arg("-ltnp"))
            .await?;
        Ok(parse::parse_listeners(&output.stdout))
    }

    async fn missing_packages(&self, names: &[String]) -> Result<Vec<String>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        // Non-zero when anything is missing; the per-package lines tell which.
        let spec = CommandSpec::new("rpm").arg("-q").args(names.iter().cloned());
        let output = self.runner.capture(&spec).await?;
        let missing = parse::missing_packages(&output.stdout);
        if !output.ok && missing.is_empty() {
            return Err(output.into_error().into());
        }
        Ok(missing)
    }

    async fn install_packages(&self, names: &[String]) -> Result<()> {
        info!("Installing packages: {}", names.join(", "));
        let spec = CommandSpec::new("dnf")
            .args(["install", "-y", "--setopt=install_weak_deps=False"])
            .args(names.iter().cloned());
        self.runner.run(&spec).await?;
        Ok(())
    }

    async fn firewall_services(&self) -> Result<BTreeSet<String>> {
        let stdout = self.firewall_cmd(String::from("--list-services")).await?;
        Ok(parse::parse_firewall_services(&stdout))
    }

    async fn firewall_add_service(&self, service: &str) -> Result<()> {
        self.firewall_cmd(format!("--add-service={service}")).await?;
        Ok(())
    }

    async fn firewall_remove_service(&self, service: &str) -> Result<()> {
        self.firewall_cmd(format!("--remove-service={service}")).await?;
        Ok(())
    }

    async fn firewall_reload(&self) -> Result<()> {
        self.runner
            .run(&CommandSpec::new("firewall-cmd").arg("--reload"))
            .await?;
        Ok(())
    }

    async fn service_state(&self, unit: &str) -> Result<ServiceState> {
        let active = self
            .runner
            .capture(&CommandSpec::new("systemctl").args(["is-active", unit]))
            .await?;
        let enabled = self
            .runner
            .capture(&CommandSpec::new("systemctl").args(["is-enabled", unit]))
            .await?;
        Ok(ServiceState {
            active: active.stdout == "active",
            enabled: enabled.stdout == "enabled",
        })
    }

    async fn service_action(&self, action: ServiceAction, unit: &str) -> Result<()> {
        self.systemctl(&[action.verb(), unit]).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await
    }

    async fn init_database_cluster(&self) -> Result<()> {
        self.runner
            .run(&CommandSpec::new("postgresql-setup").arg("--initdb"))
            .await?;
        Ok(())
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        let stdout = self
            .psql(format!("SELECT 1 FROM pg_roles WHERE rolname = {};", sql_literal(role)))
            .await?;
        Ok(parse::parse_psql_bool(&stdout))
    }

    async fn create_role(&self, role: &str, password: &str) -> Result<()> {
        self.psql(format!(
            "SET log_statement = 'none';\nCREATE ROLE {} WITH LOGIN PASSWORD {};",
            sql_ident(role),
            sql_literal(password)
        ))
        .await?;
        Ok(())
    }

    async fn set_role_password(&self, role: &str, password: &str) -> Result<()> {
        self.psql(format!(
            "SET log_statement = 'none';\nALTER ROLE {} WITH LOGIN PASSWORD {};",
            sql_ident(role),
            sql_literal(password)
        ))
        .await?;
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let stdout = self
            .psql(format!("SELECT 1 FROM pg_database WHERE datname = {};", sql_literal(name)))
            .await?;
        Ok(parse::parse_psql_bool(&stdout))
    }

    async fn create_database(&self, name: &str, owner: &str) -> Result<()> {
        self.psql(format!("CREATE DATABASE {} OWNER {};", sql_ident(name), sql_ident(owner)))
            .await?;
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool> {
        let user = User::from_name(name)
            .map_err(|e| DeployError::internal(format!("Failed to look up user {name}: {e}")))?;
        Ok(user.is_some())
    }

    async fn create_system_user(&self, account: &ServiceAccount) -> Result<()> {
        let spec = CommandSpec::new("useradd")
            .args(["--system", "--user-group", "--no-create-home"])
            .arg("--home-dir")
            .arg(account.home.display().to_string())
            .arg("--shell")
            .arg(account.shell.clone())
            .arg(account.name.clone());
        self.runner.run(&spec).await?;
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn is_readable(&self, path: &Path) -> Result<bool> {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return Ok(false);
        };
        let readable = if meta.is_dir() {
            tokio::fs::read_dir(path).await.is_ok()
        } else {
            tokio::fs::File::open(path).await.is_ok()
        };
        Ok(readable)
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", path, &e)),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8], perms: &FilePerms) -> Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_vec();
        let perms = perms.clone();
        blocking(move || write_atomic(&path, &contents, &perms)).await
    }

    async fn set_perms(&self, path: &Path, perms: &FilePerms) -> Result<bool> {
        let path = path.to_path_buf();
        let perms = perms.clone();
        blocking(move || {
            let ids = resolve_ids(perms.owner.as_deref(), perms.group.as_deref())?;
            apply_perms(&path, perms.mode, ids)
        })
        .await
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, &e)),
        }
    }

    async fn ensure_dir(&self, path: &Path, perms: &FilePerms) -> Result<bool> {
        let path = path.to_path_buf();
        let perms = perms.clone();
        blocking(move || {
            let created = !path.is_dir();
            if created {
                fs::create_dir_all(&path).map_err(|e| io_error("create", &path, &e))?;
            }
            let ids = resolve_ids(perms.owner.as_deref(), perms.group.as_deref())?;
            apply_perms(&path, perms.mode, ids)?;
            Ok(created)
        })
        .await
    }

    async fn file_digest(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .read_file(path)
            .await?
            .map(|bytes| hex::encode(Sha256::digest(&bytes))))
    }

    async fn copy_file(&self, src: &Path, dst: &Path, perms: &FilePerms) -> Result<()> {
        let contents = tokio::fs::read(src)
            .await
            .map_err(|e| io_error("read", src, &e))?;
        self.write_file(dst, &contents, perms).await
    }

    async fn mirror_tree(&self, src: &Path, dst: &Path, exclude: &[String]) -> Result<SyncReport> {
        let (src, dst, exclude) = (src.to_path_buf(), dst.to_path_buf(), exclude.to_vec());
        let report = blocking(move || mirror_blocking(&src, &dst, &exclude)).await?;
        debug!("Mirror finished: {report}");
        Ok(report)
    }

    async fn tree_digest(&self, root: &Path, exclude: &[String]) -> Result<String> {
        let (root, exclude) = (root.to_path_buf(), exclude.to_vec());
        blocking(move || tree_digest_blocking(&root, &exclude)).await
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(io_error("list", dir, &e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", dir, &e))?
        {
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn apply_tree_perms(&self, root: &Path, perms: &TreePerms) -> Result<usize> {
        let root = root.to_path_buf();
        let perms = perms.clone();
        blocking(move || {
            let ids = resolve_ids(Some(&perms.owner), Some(&perms.group))?;
            let mut changed = 0;
            for entry in WalkDir::new(&root) {
                let entry = entry.map_err(|e| io_error("walk", &root, &io::Error::from(e)))?;
                let file_type = entry.file_type();
                let mode = if file_type.is_dir() {
                    perms.dir_mode
                } else if file_type.is_file() {
                    perms.file_mode
                } else {
                    continue;
                };
                if apply_perms(entry.path(), mode, ids)? {
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }

    async fn run_build(&self, step: &BuildStep) -> Result<()> {
        for spec in step.commands() {
            info!("Building {} in {}", step.component, step.dir.display());
            self.runner
                .run(&spec)
                .await
                .map_err(|source| BuildError::ToolFailed {
                    component: step.component.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn test_proxy_config(&self) -> Result<()> {
        self.runner.run(&CommandSpec::new("nginx").arg("-t")).await?;
        Ok(())
    }

    async fn request_certificate(&self, request: &CertificateRequest) -> Result<()> {
        let spec = CommandSpec::new("certbot")
            .args(["certonly", "--webroot", "--non-interactive", "--agree-tos"])
            .arg("--keep-until-expiring")
            .arg("-w")
            .arg(request.webroot.display().to_string())
            .arg("-d")
            .arg(request.domain.clone())
            .arg("--email")
            .arg(request.email.clone());
        self.runner.run(&spec).await?;
        Ok(())
    }
}

/// Runs filesystem work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DeployError::internal(format!("Blocking task failed: {e}")))?
}

fn io_error(action: &str, path: &Path, err: &io::Error) -> DeployError {
    DeployError::Io(io::Error::new(
        err.kind(),
        format!("Failed to {action} {}: {err}", path.display()),
    ))
}

/// Single-quoted SQL literal.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Double-quoted SQL identifier.
fn sql_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn nearest_existing(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return PathBuf::from("/");
        }
    }
    current
}

/// Resolved numeric owner and group; `None` leaves that side unchanged.
type Ids = (Option<u32>, Option<u32>);

fn resolve_ids(owner: Option<&str>, group: Option<&str>) -> Result<Ids> {
    let uid = match owner {
        Some(name) => Some(
            User::from_name(name)
                .map_err(|e| DeployError::internal(format!("Failed to look up user {name}: {e}")))?
                .ok_or_else(|| DeployError::internal(format!("Unknown user: {name}")))?
                .uid
                .as_raw(),
        ),
        None => None,
    };
    let gid = match group {
        Some(name) => Some(
            Group::from_name(name)
                .map_err(|e| DeployError::internal(format!("Failed to look up group {name}: {e}")))?
                .ok_or_else(|| DeployError::internal(format!("Unknown group: {name}")))?
                .gid
                .as_raw(),
        ),
        None => None,
    };
    Ok((uid, gid))
}

/// Applies mode and ownership when they differ; returns true if anything changed.
fn apply_perms(path: &Path, mode: u32, (uid, gid): Ids) -> Result<bool> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_error("stat", path, &e))?;
    let mut changed = false;

    let owner_differs = uid.is_some_and(|u| u != meta.uid()) || gid.is_some_and(|g| g != meta.gid());
    if owner_differs {
        std::os::unix::fs::chown(path, uid, gid).map_err(|e| io_error("chown", path, &e))?;
        changed = true;
    }
    if meta.mode() & 0o7777 != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| io_error("chmod", path, &e))?;
        changed = true;
    }
    Ok(changed)
}

fn write_atomic(path: &Path, contents: &[u8], perms: &FilePerms) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("create", parent, &e))?;
    }
    let tmp = temp_path(path);

    let staged = (|| {
        let mut file = create_temp(&tmp, perms.mode).map_err(|e| io_error("create", &tmp, &e))?;
        file.write_all(contents).map_err(|e| io_error("write", &tmp, &e))?;
        file.sync_all().map_err(|e| io_error("sync", &tmp, &e))?;
        let ids = resolve_ids(perms.owner.as_deref(), perms.group.as_deref())?;
        apply_perms(&tmp, perms.mode, ids)?;
        fs::rename(&tmp, path).map_err(|e| io_error("rename", path, &e))
    })();

    if staged.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    staged
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| String::from("file"), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{file_name}.almadeploy.tmp"))
}

/// Creates `tmp` with at most `mode` from the start. A leftover from an
/// interrupted run is removed first so its mode is not inherited.
fn create_temp(tmp: &Path, mode: u32) -> io::Result<fs::File> {
    match fs::remove_file(tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode & 0o777)
        .open(tmp)
}

fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    let Ok(meta_b) = fs::symlink_metadata(b) else {
        return Ok(false);
    };
    if !meta_b.is_file() || fs::metadata(a)?.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

/// Makes `dst` an exact mirror of `src`. Top-level entries named in
/// `exclude` are neither copied nor deleted; deeper entries with the same
/// names are mirrored like any other.
fn mirror_blocking(src: &Path, dst: &Path, exclude: &[String]) -> Result<SyncReport> {
    let walk_err = |e: walkdir::Error| io_error("walk", src, &io::Error::from(e));
    let mut report = SyncReport::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    fs::create_dir_all(dst).map_err(|e| io_error("create", dst, &e))?;

    for entry in WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !relative_excluded(e.path(), src, exclude))
    {
        let entry = entry.map_err(walk_err)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        seen.insert(rel.to_path_buf());
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if !target.is_dir() {
                if target.exists() || target.is_symlink() {
                    fs::remove_file(&target).map_err(|e| io_error("remove", &target, &e))?;
                }
                fs::create_dir_all(&target).map_err(|e| io_error("create", &target, &e))?;
            }
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| io_error("read", entry.path(), &e))?;
            if fs::read_link(&target).ok().as_ref() != Some(&link) {
                remove_any(&target)?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|e| io_error("link", &target, &e))?;
                report.copied += 1;
            }
        } else if file_type.is_file() {
            let unchanged = same_content(entry.path(), &target)
                .map_err(|e| io_error("compare", entry.path(), &e))?;
            if !unchanged {
                remove_any(&target)?;
                fs::copy(entry.path(), &target).map_err(|e| io_error("copy", entry.path(), &e))?;
                report.copied += 1;
            }
        }
    }

    let mut stale = Vec::new();
    let mut walker = WalkDir::new(dst).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| io_error("walk", dst, &io::Error::from(e)))?;
        let is_dir = entry.file_type().is_dir();
        let Ok(rel) = entry.path().strip_prefix(dst) else {
            continue;
        };
        if is_excluded(rel, exclude) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if !seen.contains(rel) {
            if is_dir {
                walker.skip_current_dir();
            }
            stale.push(entry.path().to_path_buf());
        }
    }

    for path in stale {
        remove_any(&path)?;
        report.removed += 1;
    }

    Ok(report)
}

fn relative_excluded(path: &Path, root: &Path, exclude: &[String]) -> bool {
    path.strip_prefix(root)
        .is_ok_and(|rel| is_excluded(rel, exclude))
}

/// SHA-256 over the relative paths and contents of every file below `root`,
/// in name order, skipping excluded top-level entries.
fn tree_digest_blocking(root: &Path, exclude: &[String]) -> Result<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !relative_excluded(e.path(), root, exclude))
    {
        let entry = entry.map_err(|e| io_error("walk", root, &io::Error::from(e)))?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let file_type = entry.file_type();
        let body = if file_type.is_file() {
            fs::read(entry.path()).map_err(|e| io_error("read", entry.path(), &e))?
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| io_error("read", entry.path(), &e))?;
            link.as_os_str().as_bytes().to_vec()
        } else {
            continue;
        };

        let name = rel.as_os_str().as_bytes();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name);
        hasher.update((body.len() as u64).to_le_bytes());
        hasher.update(&body);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn remove_any(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| io_error("remove", path, &e))
        }
        Ok(_) => fs::remove_file(path).map_err(|e| io_error("remove", path, &e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("stat", path, &e)),
    }
}
