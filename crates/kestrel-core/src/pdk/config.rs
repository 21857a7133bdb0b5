use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

/// Raw `key = value` settings of one INI section. Values are parsed on
/// access, so a typo only fails the component reading it.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    values: HashMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{value:?} is not a valid value for {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl ModuleConfig {
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.values.insert(key, value)
    }

    /// Parse `field` if present.
    pub fn optional<T>(&self, field: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        let Some(value) = self.values.get(field) else {
            return Ok(None);
        };
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|err: T::Err| ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.clone(),
                err: err.to_string(),
            })
    }

    /// Parse `field`, falling back to `default` when missing.
    pub fn with_default<T>(&self, field: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(field)?.unwrap_or(default))
    }
}

impl FromIterator<(String, String)> for ModuleConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
