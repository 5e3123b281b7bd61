//! Gateway configuration, loaded from TOML.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use camino::{Utf8Path, Utf8PathBuf};
use registry::{MAX_FRAME_SIZE, RegistryConfig};
use serde::Deserialize;

use crate::api::GatewayBuilder;
use crate::queue::QueueConfig;

/// Largest scalar multipart field, in bytes.
pub const DEFAULT_FIELD_MAX_SIZE: usize = 10 * 1024;

/// Largest base64 manifest input, before and after decoding, in bytes.
pub const DEFAULT_MANIFEST_INPUT_MAX: usize = 500 * 1024 * 1024;

/// A configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("reading config from {path}")]
    Read {
        /// Path of the config file
        path: Utf8PathBuf,
        /// The underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for a gateway config.
    #[error("parsing config")]
    Parse(#[from] toml::de::Error),

    /// `limits.chunk-size` is zero.
    #[error("limits.chunk-size must be greater than zero")]
    ZeroChunkSize,
}

/// Byte ceilings applied to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Limits {
    /// Ceiling for each of `source`, `author` and `name`. A field of exactly
    /// this many bytes is refused.
    pub field_max_size: usize,

    /// Ceiling for all `tag` fields of one upload together.
    pub tag_budget: usize,

    /// Size of the content frames relayed to the registry.
    pub chunk_size: usize,

    /// Ceiling for a whole request body. Unset means unlimited.
    pub max_body_size: Option<usize>,

    /// Ceiling for a manifest's base64 input, encoded and decoded.
    pub manifest_input_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            field_max_size: DEFAULT_FIELD_MAX_SIZE,
            tag_budget: DEFAULT_FIELD_MAX_SIZE,
            chunk_size: MAX_FRAME_SIZE,
            max_body_size: None,
            manifest_input_max: DEFAULT_MANIFEST_INPUT_MAX,
        }
    }
}

impl Limits {
    /// Reject a zero chunk size and clamp larger ones to [`MAX_FRAME_SIZE`].
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        if self.chunk_size > MAX_FRAME_SIZE {
            tracing::warn!(
                configured = self.chunk_size,
                max = MAX_FRAME_SIZE,
                "Chunk size above the frame ceiling, clamping"
            );
            self.chunk_size = MAX_FRAME_SIZE;
        }

        Ok(self)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Pretty,

    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// Default filter directives. `RUST_LOG` takes precedence.
    pub filter: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::default(),
        }
    }
}

/// Everything needed to run a gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GatewayConfig {
    /// Address to serve HTTP on.
    pub listen: SocketAddr,

    /// Which registry to bridge to.
    pub registry: RegistryConfig,

    /// Which task queue manifests are submitted to.
    pub queue: QueueConfig,

    /// Request limits.
    pub limits: Limits,

    /// Logging settings.
    pub log: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            registry: RegistryConfig::default(),
            queue: QueueConfig::default(),
            limits: Limits::default(),
            log: LogConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Read and validate a config file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate a config document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(text)?;
        config.limits = config.limits.validate()?;
        Ok(config)
    }

    /// A router builder wired up from this config.
    pub fn builder(&self) -> GatewayBuilder {
        GatewayBuilder::new()
            .registry(self.registry.clone().build())
            .queue(self.queue.build())
            .limits(self.limits)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.limits, Limits::default());
        assert_eq!(config.limits.field_max_size, 10240);
        assert_eq!(config.limits.chunk_size, 3 * 1024 * 1024);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn full_document() {
        let config = GatewayConfig::from_toml(indoc! {r#"
            listen = "0.0.0.0:9000"
            registry = "memory"
            queue = "memory"

            [limits]
            field-max-size = 128
            tag-budget = 256
            chunk-size = 1024
            max-body-size = 1048576

            [log]
            filter = "artifact_gateway=debug"
            format = "json"
        "#})
        .unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.limits.field_max_size, 128);
        assert_eq!(config.limits.tag_budget, 256);
        assert_eq!(config.limits.chunk_size, 1024);
        assert_eq!(config.limits.max_body_size, Some(1048576));
        assert_eq!(config.limits.manifest_input_max, DEFAULT_MANIFEST_INPUT_MAX);
        assert_eq!(config.log.filter, "artifact_gateway=debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn chunk_size_is_clamped() {
        let config = GatewayConfig::from_toml(indoc! {r#"
            [limits]
            chunk-size = 67108864
        "#})
        .unwrap();
        assert_eq!(config.limits.chunk_size, MAX_FRAME_SIZE);
    }

    #[test]
    fn zero_chunk_size_is_an_error() {
        let error = GatewayConfig::from_toml(indoc! {r#"
            [limits]
            chunk-size = 0
        "#})
        .unwrap_err();
        assert!(matches!(error, ConfigError::ZeroChunkSize));
    }

    #[test]
    fn unknown_registry_is_an_error() {
        let error = GatewayConfig::from_toml(r#"registry = "etcd""#).unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("gateway.toml")).unwrap();
        std::fs::write(&path, "listen = \"127.0.0.1:7000\"\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.listen.port(), 7000);

        let missing = GatewayConfig::from_file(&path.with_file_name("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
