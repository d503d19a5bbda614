//! Shared types used across every crate in the workspace: request identity,
//! the closed error taxonomy callers observe, and the CLI > ENV > file
//! configuration merge pattern used by the process bootstrap.

mod error;
mod ids;

pub use error::{AttemptOutcome, ErrorKind, ErrorKindTag, GatewayError};
pub use ids::RequestId;

use serde::{Deserialize, Serialize};

/// Server-level configuration, merged from file, environment, and CLI flags.
///
/// Merge order: CLI > ENV > file. Unlike the admin-backed config this is
/// derived from, there is no database layer here — the merged value is the
/// final value for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("missing required configuration field: {0}")]
    MissingField(&'static str),
}

/// Optional overlay applied on top of a lower-precedence `ServerConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

impl ServerConfigPatch {
    /// Apply `other` on top of `self`, in place. Fields set in `other` win.
    pub fn overlay(&mut self, other: ServerConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.log_format.is_some() {
            self.log_format = other.log_format;
        }
    }

    pub fn into_config(self) -> Result<ServerConfig, ServerConfigError> {
        Ok(ServerConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            log_format: self.log_format.unwrap_or_default(),
        })
    }
}

impl From<ServerConfig> for ServerConfigPatch {
    fn from(value: ServerConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            log_level: Some(value.log_level),
            log_format: Some(value.log_format),
        }
    }
}

/// Sanitizes an environment value: empty strings and unexpanded
/// `${VAR}` placeholders are treated as "unset" rather than as a value.
pub fn sanitize_env(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() || (trimmed.starts_with("${") && trimmed.ends_with('}')) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_fields() {
        let mut base = ServerConfigPatch {
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            log_level: Some("info".into()),
            log_format: None,
        };
        base.overlay(ServerConfigPatch {
            host: None,
            port: Some(9000),
            log_level: None,
            log_format: Some(LogFormat::Json),
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9000));
        assert_eq!(base.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn sanitize_env_treats_placeholder_as_unset() {
        assert_eq!(sanitize_env(Some("${FOO}".into())), None);
        assert_eq!(sanitize_env(Some("   ".into())), None);
        assert_eq!(sanitize_env(Some("bar".into())), Some("bar".into()));
    }
}
