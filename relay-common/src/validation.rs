//! Configuration validation for assistant-relay.
//!
//! Checks that required credentials are present and that numeric settings
//! are within usable ranges before any component is constructed.

use thiserror::Error;

use crate::config::{AssistantConfig, ChunkingConfig, Config, DiscordConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MissingField {
        field: field.to_string(),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Collapse a list of errors into a single result.
fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Config {
    /// Validate everything needed to run the relay service.
    pub fn validate_for_serve(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.validate() {
            errors.push(e);
        }
        if is_blank(&self.discord.bot_token) {
            errors.push(missing("discord.bot_token"));
        }

        collect(errors)
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.assistant.validate() {
            errors.push(e);
        }
        if let Err(e) = self.discord.validate() {
            errors.push(e);
        }
        if let Err(e) = self.chunking.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        collect(errors)
    }
}

impl Validate for AssistantConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if is_blank(&self.api_key) {
            errors.push(missing("assistant.api_key"));
        }
        if is_blank(&self.assistant_id) {
            errors.push(missing("assistant.assistant_id"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(invalid("assistant.base_url", "must be an http(s) URL"));
        }
        if self.request_timeout_secs == 0 {
            errors.push(invalid("assistant.request_timeout_secs", "must be at least 1"));
        }

        let poll = &self.poll;
        if poll.initial_interval_ms == 0 {
            errors.push(invalid("assistant.poll.initial_interval_ms", "must be at least 1"));
        }
        if poll.max_interval_ms < poll.initial_interval_ms {
            errors.push(invalid(
                "assistant.poll.max_interval_ms",
                "must not be smaller than initial_interval_ms",
            ));
        }
        if poll.backoff_multiplier == 0 {
            errors.push(invalid("assistant.poll.backoff_multiplier", "must be at least 1"));
        }
        if poll.max_wait_secs == 0 {
            errors.push(invalid("assistant.poll.max_wait_secs", "must be at least 1"));
        }

        collect(errors)
    }
}

impl Validate for DiscordConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.allowed_channels.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("discord.allowed_channels", "contains an empty channel id"));
        }
        Ok(())
    }
}

impl Validate for ChunkingConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_len == 0 {
            return Err(invalid("chunking.max_len", "must be at least 1"));
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(invalid(
                    "observability.log_format",
                    format!("unknown format '{other}', expected json or pretty"),
                ))
            }
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(invalid(
                "observability.log_level",
                format!("unknown level '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.assistant.api_key = Some("sk-test".into());
        config.assistant.assistant_id = Some("asst_test".into());
        config.discord.bot_token = Some("token".into());
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
        assert!(valid_config().validate_for_serve().is_ok());
    }

    #[test]
    fn test_missing_credentials() {
        let config = Config::default();
        let err = config.assistant.validate().unwrap_err();
        match err {
            ValidationError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_serve_requires_bot_token() {
        let mut config = valid_config();
        config.discord.bot_token = None;
        assert!(config.validate().is_ok());
        let err = config.validate_for_serve().unwrap_err();
        assert!(err.to_string().contains("discord.bot_token"));
    }

    #[test]
    fn test_zero_chunk_length_rejected() {
        let mut config = valid_config();
        config.chunking.max_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_ordering() {
        let mut config = valid_config();
        config.assistant.poll.initial_interval_ms = 5000;
        config.assistant.poll.max_interval_ms = 1000;
        let err = config.assistant.validate().unwrap_err();
        assert!(err.to_string().contains("max_interval_ms"));
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = valid_config();
        config.assistant.poll.max_wait_secs = 0;
        assert!(config.assistant.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format() {
        let mut config = valid_config();
        config.observability.log_format = "xml".into();
        assert!(config.observability.validate().is_err());
    }
}
