pub mod auth;
pub mod handler;
pub mod known_hosts;
pub(crate) mod pattern;
pub mod paths;
pub mod resolver;
pub mod ssh_config;
pub mod tunnel;
