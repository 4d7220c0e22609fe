use std::sync::Arc;

use russh::client::Handler;
use tracing::info;

use super::{known_hosts::KnownHosts, tunnel::TunnelError};

/// Session handler for the connection layer. Its only job here is deciding
/// whether the server's host key is trusted.
pub struct ClientHandler {
    /// these are needed for the server validation callback
    server_address: String,
    server_port: u16,
    known_hosts: Arc<KnownHosts>,
}
impl ClientHandler {
    pub fn new(server_address: &str, server_port: u16, known_hosts: Arc<KnownHosts>) -> Self {
        ClientHandler {
            server_address: server_address.to_string(),
            server_port,
            known_hosts,
        }
    }
}
impl Handler for ClientHandler {
    type Error = TunnelError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "{} got server key: {}",
            format!("{}:{}", self.server_address, self.server_port),
            server_public_key.fingerprint(Default::default())
        );
        match self
            .known_hosts
            .verify(&self.server_address, self.server_port, server_public_key)
        {
            Ok(accepted) => {
                if accepted {
                    tracing::info!(
                        "host key for {:?} matches the stored one",
                        self.server_address
                    );
                }
                Ok(accepted)
            }
            Err(e) => {
                tracing::error!("{}", e.to_string());
                Err(e)
            }
        }
    }
}
