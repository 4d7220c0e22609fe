use std::{fmt, path::Path, sync::Arc, time::Duration};

use russh::{
    client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, decode_secret_key},
};
use tracing::Level;

use crate::log::DiagnosticSink;

use super::{
    handler::ClientHandler,
    known_hosts::KnownHosts,
    paths::{DEFAULT_KEYS, SshPaths},
    tunnel::TunnelError,
};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to one key candidate.
#[derive(Debug)]
pub(crate) enum KeyOutcome {
    /// nothing readable at the path, which is normal for most defaults
    Absent,
    /// the file exists but is not a usable private key
    Unparsable(String),
    Loaded(PrivateKey),
}

/// Reads and decodes one candidate. Never fails: the caller decides what each
/// outcome means.
pub(crate) fn classify(path: &Path, passphrase: Option<&str>) -> KeyOutcome {
    let Ok(bytes) = std::fs::read(path) else {
        return KeyOutcome::Absent;
    };
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return KeyOutcome::Unparsable(e.to_string()),
    };
    match decode_secret_key(&text, passphrase) {
        Ok(key) => KeyOutcome::Loaded(key),
        Err(e) => KeyOutcome::Unparsable(e.to_string()),
    }
}

/// Public key authentication with every signer that loaded, in scan order.
#[derive(Clone)]
pub struct PublicKeyAuth {
    signers: Vec<Arc<PrivateKey>>,
}

impl PublicKeyAuth {
    pub fn signers(&self) -> &[Arc<PrivateKey>] {
        &self.signers
    }
}

/// Authentication material for one tunnel. Built once, then only read, so it
/// can be shared by every connection attempt.
#[derive(Clone)]
pub struct ClientAuthConfig {
    user: String,
    auth: PublicKeyAuth,
    known_hosts: Arc<KnownHosts>,
    timeout: Duration,
}

impl fmt::Debug for ClientAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuthConfig")
            .field("user", &self.user)
            .field("signers", &self.auth.signers.len())
            .field("known_hosts", &self.known_hosts.path())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientAuthConfig {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn auth(&self) -> &PublicKeyAuth {
        &self.auth
    }

    pub fn known_hosts(&self) -> &KnownHosts {
        &self.known_hosts
    }

    /// How long the connection layer should wait for the transport.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport_config(&self) -> Arc<client::Config> {
        Arc::new(client::Config::default())
    }

    /// Handler that checks the server key against known hosts.
    pub fn handler(&self, host: &str, port: u16) -> ClientHandler {
        ClientHandler::new(host, port, self.known_hosts.clone())
    }

    /// Offers each signer in turn until the server accepts one.
    pub async fn authenticate<H>(&self, session: &mut client::Handle<H>) -> Result<bool, TunnelError>
    where
        H: client::Handler,
    {
        for signer in &self.auth.signers {
            let hash_alg = session.best_supported_rsa_hash().await?.flatten();
            let result = session
                .authenticate_publickey(
                    self.user.clone(),
                    PrivateKeyWithHashAlg::new(signer.clone(), hash_alg),
                )
                .await?;
            if result.success() {
                return Ok(true);
            }
            tracing::debug!("server refused key {}", signer.algorithm());
        }
        Ok(false)
    }
}

/// Loads keys and the host trust policy for a resolved user.
pub struct AuthBuilder<'a> {
    paths: &'a SshPaths,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> AuthBuilder<'a> {
    pub fn new(paths: &'a SshPaths, sink: &'a dyn DiagnosticSink) -> Self {
        AuthBuilder { paths, sink }
    }

    /// The declared identity comes first, then the default key locations. An
    /// empty identity simply finds nothing.
    fn candidates<'i>(&self, identity_file: &'i str) -> impl Iterator<Item = &'i str> {
        std::iter::once(identity_file).chain(DEFAULT_KEYS)
    }

    fn load_signers(&self, identity_file: &str, passphrase: Option<&str>) -> Vec<Arc<PrivateKey>> {
        let mut signers = Vec::new();
        for (index, candidate) in self.candidates(identity_file).enumerate() {
            // only the declared identity gets the passphrase
            let passphrase = if index == 0 { passphrase } else { None };
            match classify(&self.paths.expand(candidate), passphrase) {
                KeyOutcome::Absent => continue,
                KeyOutcome::Unparsable(reason) => {
                    self.sink.emit(
                        Level::WARN,
                        &format!("Unable to parse private key {candidate}: {reason}"),
                    );
                }
                KeyOutcome::Loaded(key) => {
                    tracing::debug!("loaded {} key from {}", key.algorithm(), candidate);
                    signers.push(Arc::new(key));
                }
            }
        }
        signers
    }

    pub fn build(
        &self,
        user: &str,
        identity_file: &str,
        passphrase: Option<&str>,
    ) -> Result<ClientAuthConfig, TunnelError> {
        let signers = self.load_signers(identity_file, passphrase);
        if signers.is_empty() {
            return Err(TunnelError::NoKeyFiles);
        }
        let known_hosts = KnownHosts::open(self.paths.known_hosts_file())?;

        Ok(ClientAuthConfig {
            user: user.to_string(),
            auth: PublicKeyAuth { signers },
            known_hosts: Arc::new(known_hosts),
            timeout: CONNECT_TIMEOUT,
        })
    }
}
