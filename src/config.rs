use std::{env::VarError, path::Path};

use serde::{
    Deserialize,
    de::{self, Visitor},
};

use crate::tunneling::tunnel::TunnelError;

pub const DEFAULT_PATH: &str = "~/.config/burrow.toml";

#[derive(Deserialize, Debug, PartialEq)]
pub struct TunnelsConfig {
    #[serde(default)]
    pub tunnels: Vec<TunnelDeclaration>,
}

impl TunnelsConfig {
    pub fn load(path: &Path) -> Result<TunnelsConfig, TunnelError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TunnelError::TunnelsFile(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| TunnelError::TunnelsFile(format!("{}: {}", path.display(), e)))
    }
}

/// One `[[tunnels]]` table. Everything besides `name`, `host`, `local` and
/// `remote` may be filled in from `~/.ssh/config` or defaults.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TunnelDeclaration {
    pub name: String,
    /// alias looked up in `~/.ssh/config`, or a host name used verbatim
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// private key tried before the default ones
    pub identity: Option<String>,
    pub identity_passphrase: Option<EnvOrValue>,
    /// a bare port binds on localhost
    pub local: String,
    pub remote: String,
}

#[derive(Clone, PartialEq, Debug)]
pub struct EnvOrValue {
    from_env: Option<String>,
    value: Option<String>,
}

impl EnvOrValue {
    pub fn from_value(value: impl Into<String>) -> Self {
        EnvOrValue {
            from_env: None,
            value: Some(value.into()),
        }
    }

    pub fn from_env(var: impl Into<String>) -> Self {
        EnvOrValue {
            from_env: Some(var.into()),
            value: None,
        }
    }

    /// Produces the secret, reading the environment when needed.
    pub fn get(&self) -> Result<String, TunnelError> {
        match (&self.value, &self.from_env) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(env_var)) => std::env::var(env_var).map_err(|e| match e {
                VarError::NotPresent => {
                    TunnelError::EnvError(format!("{env_var} not found in the environment!"))
                }
                VarError::NotUnicode(_) => TunnelError::EnvError(format!("{env_var} is not unicode!")),
            }),
            (None, None) => Err(TunnelError::EnvError(String::from(
                "neither `from_env` nor `value` is set",
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EnvOrValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EnvOrValueVisitor;
        impl<'de> Visitor<'de> for EnvOrValueVisitor {
            type Value = EnvOrValue;
            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter
                    .write_str("a map with at least one between `from_env` or `value` set to Some")
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut from_env = None;
                let mut value = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "from_env" => from_env = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        _ => return Err(de::Error::unknown_field(&key, &["from_env", "value"])),
                    }
                }

                if from_env.is_none() && value.is_none() {
                    return Err(de::Error::custom(
                        "at least one between `from_env` or `value` must be provided!",
                    ));
                }
                if from_env.is_some() && value.is_some() {
                    from_env = None; // value takes precedence
                }
                Ok(EnvOrValue { value, from_env })
            }
        }
        deserializer.deserialize_map(EnvOrValueVisitor)
    }
}
