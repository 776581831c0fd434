use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FLAT_SEPARATOR: char = '|';

/// Stable identity of a plugin across reconnects.
///
/// Equality is structural. Every cached entity points back to its source
/// through one of these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ProviderIdentifier {
    pub package: String,
    pub service: String,
    pub name: String,
}

impl ProviderIdentifier {
    pub fn new(
        package: impl Into<String>,
        service: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            service: service.into(),
            name: name.into(),
        }
    }

    /// Identity used for rediscovery and the known-plugins set (`package/service`).
    pub fn key(&self) -> String {
        plugin_key(&self.package, &self.service)
    }

    pub fn matches(&self, package: &str, service: &str) -> bool {
        self.package == package && self.service == service
    }

    /// Flat form used for persistence and interprocess exchange.
    pub fn to_flat_string(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.package,
            self.service,
            self.name,
            sep = FLAT_SEPARATOR
        )
    }
}

pub fn plugin_key(package: &str, service: &str) -> String {
    format!("{package}/{service}")
}

impl fmt::Display for ProviderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.name, self.package, self.service)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed provider identifier: {input:?}")]
pub struct ParseIdentifierError {
    pub input: String,
}

impl FromStr for ProviderIdentifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, FLAT_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(package), Some(service), Some(name))
                if !package.is_empty() && !service.is_empty() =>
            {
                Ok(Self::new(package, service, name))
            }
            _ => Err(ParseIdentifierError {
                input: s.to_string(),
            }),
        }
    }
}
