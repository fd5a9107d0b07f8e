//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files. Every
//! section has defaults so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InspectorConfig {
    /// Host server settings.
    pub server: ServerConfig,

    /// Capture and retention settings.
    pub recorder: RecorderConfig,

    /// Storage backend selection.
    pub storage: StorageConfig,

    /// Inspector endpoint (query API and live push).
    pub viewer: ViewerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Host server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:5000").
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Recorder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Record requests at all.
    pub enabled: bool,

    /// Maximum number of records retained.
    pub retention_max_requests: usize,

    /// Optional budget for captured body bytes across retained records.
    pub retention_max_body_bytes: Option<u64>,

    /// Request body bytes kept per record; the rest is dropped.
    pub request_body_capture_limit_bytes: usize,

    /// Response body bytes kept per record; the rest is dropped.
    pub response_body_capture_limit_bytes: usize,

    /// Sessions still open after this long are sealed as timed out.
    pub session_timeout_secs: u64,

    /// Requests that are never recorded.
    pub excludes: ExcludeConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_max_requests: 100,
            retention_max_body_bytes: None,
            request_body_capture_limit_bytes: 1024 * 1024, // 1MB
            response_body_capture_limit_bytes: 1024 * 1024,
            session_timeout_secs: 300,
            excludes: ExcludeConfig::default(),
        }
    }
}

/// Declarative exclusion rules. Any match excludes the request.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ExcludeConfig {
    /// Path suffixes, e.g. ".js".
    pub path_suffixes: Vec<String>,

    /// Path prefixes, e.g. "/static/".
    pub path_prefixes: Vec<String>,

    /// HTTP methods, e.g. "OPTIONS".
    pub methods: Vec<String>,
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, lost on restart.
    #[default]
    Memory,
    /// JSON files under `directory`.
    File,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory used by the file backend.
    pub directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            directory: "./inspector-records".to_string(),
        }
    }
}

/// Inspector endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Mount the inspector routes.
    pub enabled: bool,

    /// Path prefix of the inspector routes. Never recorded.
    pub path_prefix: String,

    /// Undelivered events buffered per live subscriber.
    pub subscriber_buffer: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_prefix: "/_inspector".to_string(),
            subscriber_buffer: 256,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Console log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Lowest level copied into recorded requests' trace lines.
    pub capture_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            capture_level: "debug".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: InspectorConfig = toml::from_str("").unwrap();
        assert_eq!(config.recorder.retention_max_requests, 100);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.viewer.path_prefix, "/_inspector");
    }

    #[test]
    fn test_partial_document() {
        let config: InspectorConfig = toml::from_str(
            r#"
            [recorder]
            retention_max_requests = 2
            request_body_capture_limit_bytes = 16

            [recorder.excludes]
            path_suffixes = [".js", ".css"]

            [storage]
            backend = "file"
            directory = "/tmp/records"
            "#,
        )
        .unwrap();
        assert_eq!(config.recorder.retention_max_requests, 2);
        assert_eq!(config.recorder.request_body_capture_limit_bytes, 16);
        assert_eq!(config.recorder.response_body_capture_limit_bytes, 1024 * 1024);
        assert_eq!(config.recorder.excludes.path_suffixes, vec![".js", ".css"]);
        assert_eq!(config.storage.backend, StorageBackend::File);
    }
}
