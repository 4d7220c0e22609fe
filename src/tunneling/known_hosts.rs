use std::path::{Path, PathBuf};

use russh::keys::{PublicKey, parse_public_key_base64};
use thiserror::Error;

use super::{pattern, tunnel::TunnelError};

#[derive(Error, Debug)]
pub enum KnownHostsError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path:?} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Marker {
    CertAuthority,
    Revoked,
}

#[derive(Debug, Clone, PartialEq)]
enum Hosts {
    Patterns(Vec<String>),
    /// `|1|salt|hash` entries, matched by russh against the file itself
    Hashed,
}

#[derive(Debug, Clone)]
struct Entry {
    line: usize,
    marker: Option<Marker>,
    hosts: Hosts,
    key: PublicKey,
}

impl Entry {
    fn matches_host(&self, lookup: &str) -> bool {
        match &self.hosts {
            Hosts::Patterns(patterns) => pattern::matches_any(lookup, patterns.iter().map(String::as_str)),
            Hosts::Hashed => false,
        }
    }

    fn same_key(&self, key: &PublicKey) -> bool {
        self.key.key_data() == key.key_data()
    }
}

/// Host key trust policy backed by an OpenSSH `known_hosts` file.
///
/// The whole file is read and validated up front, so a missing or corrupt
/// store fails when the policy is built instead of at connect time. Unknown
/// hosts are rejected.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl KnownHosts {
    pub fn open(path: impl Into<PathBuf>) -> Result<KnownHosts, KnownHostsError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|source| KnownHostsError::Io {
            path: path.clone(),
            source,
        })?;
        let entries = parse_entries(&content).map_err(|(line, reason)| KnownHostsError::Malformed {
            path: path.clone(),
            line,
            reason,
        })?;
        tracing::debug!("loaded {} known host keys from {:?}", entries.len(), path);
        Ok(KnownHosts { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Ok(true)` when the key is on record for the host, `Ok(false)` when the
    /// host is unknown or the key is revoked, and an error when the host is
    /// known under a different key.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<bool, TunnelError> {
        let lookup = if port == 22 {
            host.to_string()
        } else {
            format!("[{host}]:{port}")
        };

        if self
            .entries
            .iter()
            .any(|e| e.marker == Some(Marker::Revoked) && e.same_key(key))
        {
            tracing::warn!("host key for {} is marked as revoked", lookup);
            return Ok(false);
        }

        let mut mismatch = None;
        for entry in self
            .entries
            .iter()
            .filter(|e| e.marker.is_none() && e.matches_host(&lookup))
        {
            if entry.same_key(key) {
                return Ok(true);
            }
            mismatch.get_or_insert(entry.line);
        }

        if self.entries.iter().any(|e| e.hosts == Hosts::Hashed) {
            match russh::keys::check_known_hosts_path(host, port, key, &self.path) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(russh::keys::Error::KeyChanged { line }) => {
                    mismatch.get_or_insert(line);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match mismatch {
            Some(line) => Err(TunnelError::HostKeyMismatch {
                host: lookup,
                path: self.path.clone(),
                line,
            }),
            None => {
                tracing::warn!("{} is not present in {:?}", lookup, self.path);
                Ok(false)
            }
        }
    }
}

fn parse_entries(content: &str) -> Result<Vec<Entry>, (usize, String)> {
    let mut entries = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace().peekable();
        let marker = match fields.peek() {
            Some(&"@cert-authority") => Some(Marker::CertAuthority),
            Some(&"@revoked") => Some(Marker::Revoked),
            Some(other) if other.starts_with('@') => {
                return Err((line, format!("unknown marker {other}")));
            }
            _ => None,
        };
        if marker.is_some() {
            fields.next();
        }

        let (Some(hosts), Some(_key_type), Some(encoded)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err((line, String::from("expected host patterns, key type and key")));
        };
        let key = parse_public_key_base64(encoded).map_err(|e| (line, e.to_string()))?;
        let hosts = if hosts.starts_with('|') {
            Hosts::Hashed
        } else {
            Hosts::Patterns(hosts.split(',').map(str::to_string).collect())
        };
        entries.push(Entry {
            line,
            marker,
            hosts,
            key,
        });
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TRUSTED_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti";
    pub(crate) const OTHER_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIG9U2GJCV93/x/3BgfIsBGniZxit1ue9PrSU6cYmqcbo";

    pub(crate) fn key(encoded: &str) -> PublicKey {
        parse_public_key_base64(encoded).unwrap()
    }

    fn store(content: &str) -> (tempfile::TempDir, KnownHosts) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, content).unwrap();
        let known_hosts = KnownHosts::open(&path).unwrap();
        (dir, known_hosts)
    }

    #[test]
    fn accepts_recorded_key() {
        let (_dir, known_hosts) = store(&format!(
            "# comment\nexample.com,10.0.0.1 ssh-ed25519 {TRUSTED_KEY} foo@bar.com\n"
        ));
        assert_eq!(known_hosts.len(), 1);
        assert!(known_hosts.verify("example.com", 22, &key(TRUSTED_KEY)).unwrap());
        assert!(known_hosts.verify("10.0.0.1", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn rejects_unknown_host() {
        let (_dir, known_hosts) = store(&format!("example.com ssh-ed25519 {TRUSTED_KEY}\n"));
        assert!(!known_hosts.verify("other.com", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn changed_key_is_an_error() {
        let (_dir, known_hosts) = store(&format!("example.com ssh-ed25519 {TRUSTED_KEY}\n"));
        let result = known_hosts.verify("example.com", 22, &key(OTHER_KEY));
        assert!(matches!(
            result,
            Err(TunnelError::HostKeyMismatch { line: 1, .. })
        ));
    }

    #[test]
    fn non_default_port_uses_bracket_form() {
        let (_dir, known_hosts) = store(&format!("[example.com]:2222 ssh-ed25519 {TRUSTED_KEY}\n"));
        assert!(known_hosts.verify("example.com", 2222, &key(TRUSTED_KEY)).unwrap());
        assert!(!known_hosts.verify("example.com", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn wildcard_patterns() {
        let (_dir, known_hosts) = store(&format!(
            "*.example.com,!db.example.com ssh-ed25519 {TRUSTED_KEY}\n"
        ));
        assert!(known_hosts.verify("web.example.com", 22, &key(TRUSTED_KEY)).unwrap());
        assert!(!known_hosts.verify("db.example.com", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn revoked_key_is_rejected() {
        let (_dir, known_hosts) = store(&format!(
            "@revoked * ssh-ed25519 {TRUSTED_KEY}\nexample.com ssh-ed25519 {TRUSTED_KEY}\n"
        ));
        assert!(!known_hosts.verify("example.com", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn revocation_ignores_host_patterns() {
        let (_dir, known_hosts) = store(&format!(
            "@revoked other.example.org ssh-ed25519 {TRUSTED_KEY}\nexample.com ssh-ed25519 {TRUSTED_KEY}\n"
        ));
        assert!(!known_hosts.verify("example.com", 22, &key(TRUSTED_KEY)).unwrap());
    }

    #[test]
    fn missing_store_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let result = KnownHosts::open(dir.path().join("known_hosts"));
        assert!(matches!(result, Err(KnownHostsError::Io { .. })));
    }

    #[test]
    fn malformed_store_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "example.com ssh-ed25519\n").unwrap();
        assert!(matches!(
            KnownHosts::open(&path),
            Err(KnownHostsError::Malformed { line: 1, .. })
        ));

        std::fs::write(&path, "example.com ssh-ed25519 not-base64!!\n").unwrap();
        assert!(KnownHosts::open(&path).is_err());
    }

    #[test]
    fn empty_store_is_valid() {
        let (_dir, known_hosts) = store("");
        assert!(known_hosts.is_empty());
        assert!(!known_hosts.verify("example.com", 22, &key(TRUSTED_KEY)).unwrap());
    }
}
