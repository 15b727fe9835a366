//! In-memory [`Host`] for orchestrator tests.
//!
//! Holds a model of a host (packages, services, roles, files) behind a
//! mutex and records every mutating call, so tests can assert what a run
//! did and did not touch.

use super::{
    BuildStep, CertificateRequest, Component, DiskSpace, FilePerms, Host, Listener,
    ServiceAccount, ServiceAction, ServiceState, SyncReport, TreePerms, is_excluded,
};
use crate::config::PG_DATA_DIR;
use crate::error::{BuildError, DeployError, ExternalToolError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const GIB: u64 = 1024 * 1024 * 1024;

/// Mutable model of the fake host.
#[derive(Debug, Clone)]
pub struct FakeState {
    pub uid: u32,
    pub free_bytes: u64,
    pub listeners: Vec<Listener>,
    pub installed: BTreeSet<String>,
    pub firewall: BTreeSet<String>,
    pub services: BTreeMap<String, ServiceState>,
    pub roles: BTreeMap<String, String>,
    pub databases: BTreeMap<String, String>,
    pub users: BTreeSet<String>,
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    pub perms: BTreeMap<PathBuf, FilePerms>,
    pub dirs: BTreeSet<PathBuf>,
    /// Every mutating call, in order.
    pub mutations: Vec<String>,
    /// Mutations whose label starts with this prefix fail.
    pub fail_on: Option<String>,
    /// `nginx -t` result.
    pub proxy_config_valid: bool,
    /// Extra jar names the backend build drops into `target/`.
    pub extra_jars: Vec<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            uid: 0,
            free_bytes: 20 * GIB,
            listeners: vec![Listener {
                port: 22,
                address: String::from("0.0.0.0"),
                process: Some(String::from("sshd")),
            }],
            installed: BTreeSet::new(),
            firewall: ["cockpit", "dhcpv6-client", "ssh"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            services: BTreeMap::new(),
            roles: BTreeMap::new(),
            databases: BTreeMap::new(),
            users: BTreeSet::new(),
            files: BTreeMap::new(),
            perms: BTreeMap::new(),
            dirs: BTreeSet::new(),
            mutations: Vec::new(),
            fail_on: None,
            proxy_config_valid: true,
            extra_jars: Vec::new(),
        }
    }
}

/// A host that exists only in memory.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// A fresh AlmaLinux install with backend and frontend sources at `/srv`.
    pub fn with_sources() -> Self {
        let host = Self::default();
        {
            let mut state = host.lock();
            for (path, contents) in [
                ("/srv/backend/pom.xml", "<project/>"),
                ("/srv/backend/src/main/java/App.java", "class App {}"),
                ("/srv/frontend/package.json", "{}"),
                ("/srv/frontend/src/main.js", "render()"),
            ] {
                state.files.insert(PathBuf::from(path), contents.as_bytes().to_vec());
            }
        }
        host
    }

    /// Locks the model.
    pub fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of the recorded mutations.
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    /// Clears the mutation log.
    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Makes every mutation starting with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        self.lock().fail_on = Some(prefix.to_string());
    }

    /// File contents as UTF-8.
    pub fn file_text(&self, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(Path::new(path))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn mutate(&self, label: String) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        let fails = state
            .fail_on
            .as_deref()
            .is_some_and(|prefix| label.starts_with(prefix));
        if fails {
            state.mutations.push(format!("FAILED {label}"));
            return Err(ExternalToolError::from_parts(label, Some(1), "injected failure").into());
        }
        state.mutations.push(label);
        Ok(state)
    }
}

fn under<'a>(files: &'a BTreeMap<PathBuf, Vec<u8>>, root: &'a Path) -> impl Iterator<Item = (&'a PathBuf, &'a Vec<u8>)> {
    files.iter().filter(move |(path, _)| path.starts_with(root) && *path != root)
}

#[async_trait]
impl Host for FakeHost {
    async fn effective_uid(&self) -> u32 {
        self.lock().uid
    }

    async fn available_space(&self, _path: &Path) -> Result<DiskSpace> {
        Ok(DiskSpace {
            mount: String::from("/"),
            available_bytes: self.lock().free_bytes,
        })
    }

    async fn listeners(&self) -> Result<Vec<Listener>> {
        Ok(self.lock().listeners.clone())
    }

    async fn missing_packages(&self, names: &[String]) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(names
            .iter()
            .filter(|n| !state.installed.contains(*n))
            .cloned()
            .collect())
    }

    async fn install_packages(&self, names: &[String]) -> Result<()> {
        let mut state = self.mutate(format!("dnf install {}", names.join(" ")))?;
        state.installed.extend(names.iter().cloned());
        if names.iter().any(|n| n == "nginx") {
            state.users.insert(String::from("nginx"));
        }
        Ok(())
    }

    async fn firewall_services(&self) -> Result<BTreeSet<String>> {
        Ok(self.lock().firewall.clone())
    }

    async fn firewall_add_service(&self, service: &str) -> Result<()> {
        self.mutate(format!("firewall add {service}"))?
            .firewall
            .insert(service.to_string());
        Ok(())
    }

    async fn firewall_remove_service(&self, service: &str) -> Result<()> {
        self.mutate(format!("firewall remove {service}"))?
            .firewall
            .remove(service);
        Ok(())
    }

    async fn firewall_reload(&self) -> Result<()> {
        drop(self.mutate(String::from("firewall reload"))?);
        Ok(())
    }

    async fn service_state(&self, unit: &str) -> Result<ServiceState> {
        Ok(self.lock().services.get(unit).copied().unwrap_or_default())
    }

    async fn service_action(&self, action: ServiceAction, unit: &str) -> Result<()> {
        let mut state = self.mutate(format!("systemctl {action} {unit}"))?;
        let entry = state.services.entry(unit.to_string()).or_default();
        match action {
            ServiceAction::Enable => entry.enabled = true,
            ServiceAction::Start | ServiceAction::Restart => entry.active = true,
            ServiceAction::Stop => entry.active = false,
            ServiceAction::Reload => {}
        }
        let active = entry.active;
        let unit_port = state
            .files
            .get(&PathBuf::from(format!("/etc/systemd/system/{unit}")))
            .and_then(|body| {
                String::from_utf8_lossy(body)
                    .lines()
                    .find_map(|l| l.strip_prefix("Environment=SERVER_PORT=").map(str::to_string))
            })
            .and_then(|p| p.parse::<u16>().ok());
        if let Some(port) = unit_port {
            state.listeners.retain(|l| l.port != port);
            if active {
                state.listeners.push(Listener {
                    port,
                    address: String::from("127.0.0.1"),
                    process: Some(String::from("java")),
                });
            }
        }
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<()> {
        drop(self.mutate(String::from("systemctl daemon-reload"))?);
        Ok(())
    }

    async fn init_database_cluster(&self) -> Result<()> {
        let mut state = self.mutate(String::from("postgresql-setup --initdb"))?;
        let data = PathBuf::from(PG_DATA_DIR);
        state.files.insert(data.join("PG_VERSION"), b"13\n".to_vec());
        state.files.insert(
            data.join("pg_hba.conf"),
            b"local   all   all   peer\nhost    all   all   127.0.0.1/32   ident\n".to_vec(),
        );
        state.files.insert(
            data.join("postgresql.conf"),
            b"#listen_addresses = 'localhost'\nmax_connections = 100\n".to_vec(),
        );
        Ok(())
    }

    async fn role_exists(&self, role: &str) -> Result<bool> {
        Ok(self.lock().roles.contains_key(role))
    }

    async fn create_role(&self, role: &str, password: &str) -> Result<()> {
        self.mutate(format!("create role {role}"))?
            .roles
            .insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn set_role_password(&self, role: &str, password: &str) -> Result<()> {
        self.mutate(format!("alter role {role} password"))?
            .roles
            .insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().databases.contains_key(name))
    }

    async fn create_database(&self, name: &str, owner: &str) -> Result<()> {
        self.mutate(format!("create database {name} owner {owner}"))?
            .databases
            .insert(name.to_string(), owner.to_string());
        Ok(())
    }

    async fn user_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().users.contains(name))
    }

    async fn create_system_user(&self, account: &ServiceAccount) -> Result<()> {
        self.mutate(format!("useradd {}", account.name))?
            .users
            .insert(account.name.clone());
        Ok(())
    }

    async fn path_exists(&self, path: &Path) -> Result<bool> {
        let state = self.lock();
        Ok(state.files.contains_key(path)
            || state.dirs.contains(path)
            || state.files.keys().any(|p| p.starts_with(path)))
    }

    async fn is_readable(&self, path: &Path) -> Result<bool> {
        self.path_exists(path).await
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().files.get(path).cloned())
    }

    async fn write_file(&self, path: &Path, contents: &[u8], perms: &FilePerms) -> Result<()> {
        let mut state = self.mutate(format!("write {}", path.display()))?;
        state.files.insert(path.to_path_buf(), contents.to_vec());
        state.perms.insert(path.to_path_buf(), perms.clone());
        Ok(())
    }

    async fn set_perms(&self, path: &Path, perms: &FilePerms) -> Result<bool> {
        if self.lock().perms.get(path) == Some(perms) {
            return Ok(false);
        }
        self.mutate(format!("chmod {}", path.display()))?
            .perms
            .insert(path.to_path_buf(), perms.clone());
        Ok(true)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.mutate(format!("remove {}", path.display()))?;
        state.files.remove(path);
        state.perms.remove(path);
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path, perms: &FilePerms) -> Result<bool> {
        if self.lock().dirs.contains(path) {
            self.set_perms(path, perms).await?;
            return Ok(false);
        }
        let mut state = self.mutate(format!("mkdir {}", path.display()))?;
        state.dirs.insert(path.to_path_buf());
        state.perms.insert(path.to_path_buf(), perms.clone());
        Ok(true)
    }

    async fn file_digest(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .lock()
            .files
            .get(path)
            .map(|b| hex::encode(Sha256::digest(b))))
    }

    async fn copy_file(&self, src: &Path, dst: &Path, perms: &FilePerms) -> Result<()> {
        let contents = self
            .lock()
            .files
            .get(src)
            .cloned()
            .ok_or_else(|| DeployError::internal(format!("no such file: {}", src.display())))?;
        self.write_file(dst, &contents, perms).await
    }

    async fn mirror_tree(&self, src: &Path, dst: &Path, exclude: &[String]) -> Result<SyncReport> {
        let (wanted, stale) = {
            let state = self.lock();
            let wanted: BTreeMap<PathBuf, Vec<u8>> = under(&state.files, src)
                .filter_map(|(path, body)| {
                    let rel = path.strip_prefix(src).ok()?;
                    (!is_excluded(rel, exclude)).then(|| (dst.join(rel), body.clone()))
                })
                .filter(|(target, body)| state.files.get(target) != Some(body))
                .collect();
            let stale: Vec<PathBuf> = under(&state.files, dst)
                .filter_map(|(path, _)| {
                    let rel = path.strip_prefix(dst).ok()?;
                    let keep = is_excluded(rel, exclude) || state.files.contains_key(&src.join(rel));
                    (!keep).then(|| path.clone())
                })
                .collect();
            (wanted, stale)
        };

        let report = SyncReport {
            copied: wanted.len(),
            removed: stale.len(),
        };
        if report.changed() {
            let mut state = self.mutate(format!("mirror {} -> {}", src.display(), dst.display()))?;
            state.files.extend(wanted);
            for path in stale {
                state.files.remove(&path);
            }
            state.dirs.insert(dst.to_path_buf());
        }
        Ok(report)
    }

    async fn tree_digest(&self, root: &Path, exclude: &[String]) -> Result<String> {
        let state = self.lock();
        let mut hasher = Sha256::new();
        for (path, body) in under(&state.files, root) {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if is_excluded(rel, exclude) {
                continue;
            }
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(body);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    async fn apply_tree_perms(&self, root: &Path, perms: &TreePerms) -> Result<usize> {
        let file_perms = FilePerms::owned(perms.file_mode, &perms.owner, &perms.group);
        let pending: Vec<PathBuf> = {
            let state = self.lock();
            under(&state.files, root)
                .map(|(p, _)| p.clone())
                .filter(|p| state.perms.get(p) != Some(&file_perms))
                .collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }
        let mut state = self.mutate(format!("chown -R {}", root.display()))?;
        for path in &pending {
            state.perms.insert(path.clone(), file_perms.clone());
        }
        Ok(pending.len())
    }

    async fn run_build(&self, step: &BuildStep) -> Result<()> {
        let label = format!("build {}", step.component);
        let mut state = self.mutate(label.clone()).map_err(|e| match e {
            DeployError::ExternalTool(source) => DeployError::Build(BuildError::ToolFailed {
                component: step.component.to_string(),
                source,
            }),
            other => other,
        })?;
        let inputs = under(&state.files, &step.dir).count();
        match step.component {
            Component::Backend => {
                let target = step.dir.join("target");
                let jar = format!("app-1.0 built from {inputs} files");
                state.files.insert(target.join("app-1.0.jar"), jar.into_bytes());
                state
                    .files
                    .insert(target.join("app-1.0-sources.jar"), b"sources".to_vec());
                let extra = state.extra_jars.clone();
                for name in extra {
                    state.files.insert(target.join(name), b"extra".to_vec());
                }
            }
            Component::Frontend => {
                let dist = step.dir.join("dist");
                state
                    .files
                    .insert(dist.join("index.html"), b"<div id=app></div>".to_vec());
                state
                    .files
                    .insert(dist.join("assets").join("main.js"), b"render()".to_vec());
            }
        }
        Ok(())
    }

    async fn test_proxy_config(&self) -> Result<()> {
        let valid = self.lock().proxy_config_valid;
        drop(self.mutate(String::from("nginx -t"))?);
        if valid {
            Ok(())
        } else {
            Err(ExternalToolError::from_parts("nginx -t", Some(1), "nginx: configuration file test failed").into())
        }
    }

    async fn request_certificate(&self, request: &CertificateRequest) -> Result<()> {
        let mut state = self.mutate(format!("certbot {}", request.domain))?;
        let live = PathBuf::from(format!("/etc/letsencrypt/live/{}", request.domain));
        state.files.insert(live.join("fullchain.pem"), b"CERT".to_vec());
        state.files.insert(live.join("privkey.pem"), b"KEY".to_vec());
        Ok(())
    }
}
