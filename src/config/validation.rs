//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules.
//! All problems are reported at once.

use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

use crate::config::schema::{InspectorConfig, StorageBackend};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    Address { field: &'static str, value: String },

    #[error("{field} is not a valid log level: {value}")]
    LogLevel { field: &'static str, value: String },

    #[error("viewer.path_prefix must start with '/' and not end with '/': {0}")]
    PathPrefix(String),

    #[error("storage.directory is required for the file backend")]
    MissingDirectory,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &InspectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if SocketAddr::from_str(&config.server.bind_address).is_err() {
        errors.push(ValidationError::Address {
            field: "server.bind_address",
            value: config.server.bind_address.clone(),
        });
    }

    let recorder = &config.recorder;
    if recorder.retention_max_requests == 0 {
        errors.push(ValidationError::Zero {
            field: "recorder.retention_max_requests",
        });
    }
    if recorder.retention_max_body_bytes == Some(0) {
        errors.push(ValidationError::Zero {
            field: "recorder.retention_max_body_bytes",
        });
    }
    if recorder.session_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "recorder.session_timeout_secs",
        });
    }

    if config.storage.backend == StorageBackend::File && config.storage.directory.trim().is_empty() {
        errors.push(ValidationError::MissingDirectory);
    }

    let prefix = &config.viewer.path_prefix;
    if !prefix.starts_with('/') || prefix.ends_with('/') {
        errors.push(ValidationError::PathPrefix(prefix.clone()));
    }
    if config.viewer.subscriber_buffer == 0 {
        errors.push(ValidationError::Zero {
            field: "viewer.subscriber_buffer",
        });
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_secs",
        });
    }

    let observability = &config.observability;
    for (field, value) in [
        ("observability.log_level", &observability.log_level),
        ("observability.capture_level", &observability.capture_level),
    ] {
        if LevelFilter::from_str(value).is_err() {
            errors.push(ValidationError::LogLevel {
                field,
                value: value.clone(),
            });
        }
    }
    if observability.metrics_enabled && SocketAddr::from_str(&observability.metrics_address).is_err() {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&InspectorConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = InspectorConfig::default();
        config.server.bind_address = "nowhere".into();
        config.recorder.retention_max_requests = 0;
        config.viewer.path_prefix = "inspector/".into();
        config.observability.capture_level = "loud".into();
        config.storage.backend = StorageBackend::File;
        config.storage.directory = " ".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::Zero {
            field: "recorder.retention_max_requests"
        }));
        assert!(errors.contains(&ValidationError::MissingDirectory));
    }

    #[test]
    fn test_metrics_address_only_checked_when_enabled() {
        let mut config = InspectorConfig::default();
        config.observability.metrics_address = "bad".into();
        assert!(validate_config(&config).is_ok());
        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
