use std::sync::Arc;

use crate::{config::TunnelDeclaration, log::DiagnosticSink};

use super::{
    auth::{AuthBuilder, ClientAuthConfig},
    paths::SshPaths,
    ssh_config::{HostConfigEntry, HostConfigReader},
    tunnel::TunnelError,
};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Fully resolved parameters for one tunnel, ready for the connection layer.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub local_address: String,
    pub remote_address: String,
    pub host_name: String,
    pub user: String,
    pub port: u16,
    /// may be empty, the default keys are still tried
    pub identity_file: String,
    pub client_config: Arc<ClientAuthConfig>,
}

/// One source of connection settings. Sources are layered with [`or`], the
/// receiver winning wherever it has a value.
///
/// [`or`]: ConnectionFields::or
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConnectionFields {
    pub host_name: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
}

impl ConnectionFields {
    pub fn or(self, lower: ConnectionFields) -> ConnectionFields {
        ConnectionFields {
            host_name: self.host_name.or(lower.host_name),
            user: self.user.or(lower.user),
            port: self.port.or(lower.port),
            identity_file: self.identity_file.or(lower.identity_file),
        }
    }

    pub fn defaults() -> ConnectionFields {
        ConnectionFields {
            port: Some(DEFAULT_SSH_PORT),
            ..Default::default()
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl From<&TunnelDeclaration> for ConnectionFields {
    /// The declared `host` is an alias, not a host name, so it never fills
    /// `host_name` here.
    fn from(declaration: &TunnelDeclaration) -> Self {
        ConnectionFields {
            host_name: None,
            user: non_empty(declaration.user.as_ref()),
            port: declaration.port.filter(|p| *p != 0),
            identity_file: non_empty(declaration.identity.as_ref()),
        }
    }
}

impl From<HostConfigEntry> for ConnectionFields {
    fn from(entry: HostConfigEntry) -> Self {
        let port = entry.port.and_then(|text| match text.parse::<u16>() {
            Ok(port) if port != 0 => Some(port),
            _ => {
                tracing::debug!("ignoring invalid Port {text:?} from ssh config");
                None
            }
        });
        ConnectionFields {
            host_name: non_empty(entry.host_name.as_ref()),
            user: non_empty(entry.user.as_ref()),
            port,
            identity_file: non_empty(entry.identity_file.as_ref()),
        }
    }
}

/// Connection parameters that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFields {
    pub host_name: String,
    pub user: String,
    pub port: u16,
    pub identity_file: String,
}

/// Folds the sources from highest to lowest precedence, falls back to the
/// alias for the host name and checks the required fields.
pub fn merge(
    alias: &str,
    sources: impl IntoIterator<Item = ConnectionFields>,
) -> Result<ResolvedFields, TunnelError> {
    let merged = sources
        .into_iter()
        .fold(ConnectionFields::default(), ConnectionFields::or);

    let host_name = merged.host_name.unwrap_or_else(|| alias.to_string());
    if host_name.is_empty() {
        return Err(TunnelError::MissingField("host"));
    }
    let Some(user) = merged.user.filter(|u| !u.is_empty()) else {
        return Err(TunnelError::MissingField("user"));
    };
    let port = match merged.port {
        Some(port) if port != 0 => port,
        _ => return Err(TunnelError::MissingField("port")),
    };
    Ok(ResolvedFields {
        host_name,
        user,
        port,
        identity_file: merged.identity_file.unwrap_or_default(),
    })
}

/// A bare port becomes `localhost:<port>`; anything with a `:` is kept.
pub fn normalize_local_address(spec: &str) -> String {
    if spec.contains(':') {
        spec.to_string()
    } else {
        format!("localhost:{spec}")
    }
}

/// Turns a declaration into a [`RunConfig`]. Each call is independent, so
/// tunnels can be resolved side by side.
pub struct Resolver<'a> {
    paths: &'a SshPaths,
    reader: HostConfigReader,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> Resolver<'a> {
    pub fn new(paths: &'a SshPaths, sink: &'a dyn DiagnosticSink) -> Self {
        Resolver {
            paths,
            reader: HostConfigReader::new(paths.config_file()).with_home(paths.home()),
            sink,
        }
    }

    pub fn resolve(&self, declaration: &TunnelDeclaration) -> Result<RunConfig, TunnelError> {
        let entry = self.reader.read(&declaration.host)?;
        let fields = merge(
            &declaration.host,
            [
                ConnectionFields::from(declaration),
                ConnectionFields::from(entry),
                ConnectionFields::defaults(),
            ],
        )?;
        tracing::debug!(
            "{}: resolved {}@{}:{}",
            declaration.name,
            fields.user,
            fields.host_name,
            fields.port
        );

        let passphrase = declaration
            .identity_passphrase
            .as_ref()
            .map(|p| p.get())
            .transpose()?;
        let client_config = AuthBuilder::new(self.paths, self.sink).build(
            &fields.user,
            &fields.identity_file,
            passphrase.as_deref(),
        )?;

        Ok(RunConfig {
            local_address: normalize_local_address(&declaration.local),
            remote_address: declaration.remote.clone(),
            host_name: fields.host_name,
            user: fields.user,
            port: fields.port,
            identity_file: fields.identity_file,
            client_config: Arc::new(client_config),
        })
    }
}
