//! Configuration and content hashing.
//!
//! The config fingerprint goes into the summary and the log so two runs can
//! be told apart; content digests decide whether a file needs rewriting.

use sha2::{Digest, Sha256};

use super::spec::DeployConfig;

/// Hasher for computing configuration and content hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// The database password enters only as its own digest.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        field(&mut hasher, config.domain.as_bytes());
        field(&mut hasher, config.contact_email.as_deref().unwrap_or("").as_bytes());
        field(&mut hasher, config.app_name().as_bytes());

        field(&mut hasher, config.database.name.as_bytes());
        field(&mut hasher, config.database.user.as_bytes());
        field(&mut hasher, self.hash_bytes(config.database.password.as_bytes()).as_bytes());

        field(&mut hasher, config.sources.backend.as_os_str().as_encoded_bytes());
        field(&mut hasher, config.sources.frontend.as_os_str().as_encoded_bytes());
        let mut exclude: Vec<_> = config.sources.exclude.iter().collect();
        exclude.sort();
        for name in exclude {
            field(&mut hasher, name.as_bytes());
        }

        for path in [&config.tls.cert_path, &config.tls.key_path, &config.tls.chain_path] {
            let bytes = path.as_ref().map_or(&[][..], |p| p.as_os_str().as_encoded_bytes());
            field(&mut hasher, bytes);
        }

        hasher.update(config.app.port.to_be_bytes());
        field(&mut hasher, config.app.api_prefix.as_bytes());
        field(&mut hasher, config.app.java_opts.as_bytes());
        hasher.update(config.app.restart_sec.to_be_bytes());
        hasher.update(config.app.limit_nofile.to_be_bytes());
        field(&mut hasher, config.app.memory_max.as_bytes());

        field(&mut hasher, config.health.path.as_bytes());
        hasher.update(config.health.attempts.to_be_bytes());
        hasher.update(config.health.interval_secs.to_be_bytes());

        // Sets, so order must not matter.
        let mut services: Vec<_> = config.firewall.services.iter().collect();
        services.sort();
        for service in services {
            field(&mut hasher, service.as_bytes());
        }
        let mut packages: Vec<_> = config.packages.required.iter().collect();
        packages.sort();
        for package in packages {
            field(&mut hasher, package.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// SHA-256 of raw bytes, hex encoded.
    #[must_use]
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Returns true if two byte strings have the same digest.
    #[must_use]
    pub fn content_matches(&self, current: &[u8], desired: &[u8]) -> bool {
        current.len() == desired.len() && self.hash_bytes(current) == self.hash_bytes(desired)
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

/// Length-prefixes a field so adjacent values cannot run together.
fn field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
