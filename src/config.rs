//! Client configuration
//!
//! Configuration is read from YAML. Every field has a default matching the
//! stock backend (`localhost:5001`, 60Hz refresh, JPEG quality 80), so an
//! empty document is valid.
//!
//! ```rust
//! use lanevision::ClientConfig;
//!
//! let config = ClientConfig::from_yaml_str(
//!     "endpoint:\n  host: lanes.local\n  port: 5001\njpeg_quality: 70\n",
//! )
//! .unwrap();
//! assert_eq!(config.endpoint.websocket_url(), "ws://lanes.local:5001/socket.io/?EIO=4&transport=websocket");
//! assert_eq!(config.jpeg_quality, 70);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::JpegQuality;
use crate::types::RefreshRate;
use crate::{Result, StreamError};

/// Address of the processing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://`
    pub secure: bool,
    /// Socket.IO mount path
    pub path: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self { host: "localhost".to_string(), port: 5001, secure: false, path: "/socket.io/".to_string() }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, ..Self::default() }
    }

    /// Engine.IO websocket URL for this endpoint
    pub fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut path = self.path.clone();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        format!("{}://{}:{}{}?EIO=4&transport=websocket", scheme, self.host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    /// Accepts `host:port`, or a URL such as `http://localhost:5001`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (secure, rest) = if let Some(rest) = s.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("http://") {
            (false, rest)
        } else if let Some(rest) = s.strip_prefix("ws://") {
            (false, rest)
        } else {
            (false, s)
        };
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| StreamError::Config {
                    details: format!("invalid port in endpoint '{}'", s),
                })?;
                (host, port)
            }
            None if secure => (authority, 443),
            None => (authority, 80),
        };

        if host.is_empty() {
            return Err(StreamError::Config { details: format!("missing host in endpoint '{}'", s) });
        }

        Ok(Self { host: host.to_string(), port, secure, ..Self::default() })
    }
}

/// Streaming client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Processing service address
    pub endpoint: Endpoint,

    /// Capture tick rate; `None` follows the display rate
    pub refresh_hz: Option<u32>,

    /// JPEG quality for outgoing frames (1-100)
    pub jpeg_quality: u8,

    /// Playback rate for directories of still frames
    pub sequence_fps: f64,

    /// How long to wait for the Socket.IO handshake
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            refresh_hz: None,
            jpeg_quality: JpegQuality::DEFAULT.get(),
            sequence_fps: 30.0,
            connect_timeout_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ClientConfig =
            if yaml.trim().is_empty() { Self::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.host.is_empty() {
            return Err(StreamError::Config { details: "endpoint.host is empty".to_string() });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StreamError::Config {
                details: format!("jpeg_quality must be 1-100, got {}", self.jpeg_quality),
            });
        }
        if !self.sequence_fps.is_finite() || self.sequence_fps <= 0.0 {
            return Err(StreamError::Config {
                details: format!("sequence_fps must be positive, got {}", self.sequence_fps),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::Config {
                details: "connect_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn refresh_rate(&self) -> RefreshRate {
        RefreshRate::from_hz(self.refresh_hz)
    }

    pub fn quality(&self) -> JpegQuality {
        JpegQuality::new(self.jpeg_quality)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
