use std::path::{Path, PathBuf};

use super::tunnel::TunnelError;

/// Conventional key locations tried after the declared identity file.
pub(crate) const DEFAULT_KEYS: [&str; 3] = ["~/.ssh/id_rsa", "~/.ssh/id_ecdsa", "~/.ssh/id_ed25519"];

/// Every per-user path the resolver touches hangs off one home directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SshPaths {
    home: PathBuf,
}

impl SshPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        SshPaths { home: home.into() }
    }

    /// Reads the home directory from `HOME`.
    pub fn from_env() -> Result<Self, TunnelError> {
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => Ok(SshPaths::new(home)),
            _ => Err(TunnelError::NoHome),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// `~/.ssh/<name>`
    pub fn ssh_file(&self, name: &str) -> PathBuf {
        self.home.join(".ssh").join(name)
    }

    pub fn config_file(&self) -> PathBuf {
        self.ssh_file("config")
    }

    pub fn known_hosts_file(&self) -> PathBuf {
        self.ssh_file("known_hosts")
    }

    /// Expands a bare `~` or a `~/` prefix. `~user` forms are left alone.
    pub fn expand(&self, path: &str) -> PathBuf {
        if path == "~" {
            self.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            self.home.join(rest)
        } else {
            PathBuf::from(path)
        }
    }
}
