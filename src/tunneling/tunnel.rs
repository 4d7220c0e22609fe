use std::path::PathBuf;

use thiserror::Error;

use crate::{config::TunnelDeclaration, log::DiagnosticSink};

use super::{
    known_hosts::KnownHostsError,
    paths::SshPaths,
    resolver::{Resolver, RunConfig},
    ssh_config::SshConfigError,
};

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("could not parse SSH config: {0}")]
    SshConfig(SshConfigError),
    #[error("no {0} specified")]
    MissingField(&'static str),
    #[error("no key files found")]
    NoKeyFiles,
    #[error("could not load known hosts: {0}")]
    KnownHosts(KnownHostsError),
    #[error("env variable for private key error: {0}")]
    EnvError(String),
    #[error("HOME is not set")]
    NoHome,
    #[error("host key for {host} does not match {path:?} line {line}")]
    HostKeyMismatch {
        host: String,
        path: PathBuf,
        line: usize,
    },
    #[error("could not load tunnels file: {0}")]
    TunnelsFile(String),
    #[error("io error: {1}")]
    Io(std::io::Error, String),
    #[error("ssh error: {0}")]
    Ssh(russh::Error),
    #[error("key error: {0}")]
    Key(russh::keys::Error),
}
impl From<SshConfigError> for TunnelError {
    fn from(value: SshConfigError) -> Self {
        Self::SshConfig(value)
    }
}
impl From<KnownHostsError> for TunnelError {
    fn from(value: KnownHostsError) -> Self {
        Self::KnownHosts(value)
    }
}
impl From<std::io::Error> for TunnelError {
    fn from(value: std::io::Error) -> Self {
        let str = value.to_string();
        Self::Io(value, str)
    }
}
impl From<russh::Error> for TunnelError {
    fn from(value: russh::Error) -> Self {
        Self::Ssh(value)
    }
}
impl From<russh::keys::Error> for TunnelError {
    fn from(value: russh::keys::Error) -> Self {
        Self::Key(value)
    }
}

/// A declared tunnel whose connection parameters have been resolved and
/// whose authentication material is loaded.
#[derive(Debug)]
pub struct Tunnel {
    /// tunnel name
    name: String,
    /// everything the connection layer needs
    run_config: RunConfig,
}

impl Tunnel {
    pub fn new(
        declaration: TunnelDeclaration,
        paths: &SshPaths,
        sink: &dyn DiagnosticSink,
    ) -> Result<Tunnel, TunnelError> {
        let run_config = Resolver::new(paths, sink).resolve(&declaration)?;
        Ok(Tunnel {
            name: declaration.name,
            run_config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }
}
