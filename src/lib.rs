//! Resolves declared SSH tunnels into validated connection parameters and
//! ready-to-use client authentication, before any connection is opened.

pub mod config;
pub mod log;
pub mod tunneling;

pub use config::{EnvOrValue, TunnelDeclaration, TunnelsConfig};
pub use tunneling::{
    auth::{AuthBuilder, ClientAuthConfig},
    paths::SshPaths,
    resolver::{Resolver, RunConfig, normalize_local_address},
    tunnel::{Tunnel, TunnelError},
};
