//! `${env.NAME}` and `${file.PATH}` references in configuration values.

#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;

use super::ConfigurationError;

const SUPPORTED_MODES: &str = "env|file";

/// Expands `${env.NAME}` and `${file.PATH}` references in configuration string values.
///
/// Runs after the `.env` file has been loaded. With `GATEWAY_CONFIG_ENV_PREFIX=P`,
/// `${env.NAME}` reads `P_NAME`. A missing file expands to the empty string, a missing variable
/// is an error.
#[derive(buildstructor::Builder, Clone, Default)]
pub(crate) struct Expansion {
    prefix: Option<String>,
    #[cfg(test)]
    mocked_env_vars: HashMap<String, String>,
}

impl Expansion {
    pub(crate) fn from_env() -> Result<Self, ConfigurationError> {
        let prefix = match env::var("GATEWAY_CONFIG_ENV_PREFIX") {
            Ok(prefix) => Some(prefix),
            Err(env::VarError::NotPresent) => None,
            Err(env::VarError::NotUnicode(_)) => {
                return Err(ConfigurationError::InvalidExpansionModeConfig);
            }
        };
        Ok(Self {
            prefix,
            #[cfg(test)]
            mocked_env_vars: HashMap::new(),
        })
    }

    /// Returns a copy of `configuration` with every string expanded.
    pub(crate) fn expand(&self, configuration: &Value) -> Result<Value, ConfigurationError> {
        Ok(match configuration {
            Value::String(raw) => {
                let expanded = shellexpand::env_with_context(raw, |key: &str| self.lookup(key))
                    .map_err(|error| error.cause)?;
                if expanded == raw.as_str() {
                    configuration.clone()
                } else {
                    // `${env.PORT}` must become a number, not the string "4001"
                    coerce(&expanded)
                }
            }
            Value::Array(values) => Value::Array(
                values
                    .iter()
                    .map(|value| self.expand(value))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(members) => Value::Object(
                members
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.expand(value)?)))
                    .collect::<Result<_, ConfigurationError>>()?,
            ),
            _ => configuration.clone(),
        })
    }

    fn lookup(&self, key: &str) -> Result<Option<String>, ConfigurationError> {
        match key.split_once('.') {
            Some(("env", name)) => {
                let name = match &self.prefix {
                    Some(prefix) => format!("{prefix}_{name}"),
                    None => name.to_string(),
                };
                self.env_var(&name)
                    .map(Some)
                    .map_err(|cause| ConfigurationError::CannotExpandVariable {
                        key: name,
                        cause: cause.to_string(),
                    })
            }
            Some(("file", path)) if !Path::new(path).exists() => Ok(None),
            Some(("file", path)) => fs::read_to_string(path).map(Some).map_err(|cause| {
                ConfigurationError::CannotExpandVariable {
                    key: path.to_string(),
                    cause: cause.to_string(),
                }
            }),
            _ => Err(ConfigurationError::UnknownExpansionMode {
                key: key.to_string(),
                supported_modes: SUPPORTED_MODES.to_string(),
            }),
        }
    }

    fn env_var(&self, name: &str) -> Result<String, env::VarError> {
        #[cfg(test)]
        if let Some(value) = self.mocked_env_vars.get(name) {
            return Ok(value.clone());
        }
        env::var(name)
    }
}

/// Reparses an expanded string so that booleans, numbers and null keep their type.
fn coerce(expanded: &str) -> Value {
    match serde_yaml::from_str::<Value>(expanded) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
        _ => Value::String(expanded.to_string()),
    }
}
