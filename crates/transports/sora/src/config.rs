//! Configuration types for a Sora signaling session

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Immutable input for one client: where to connect and what to ask the SFU for.
///
/// Created once by the caller and never mutated after `SoraClient::connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Channel (room) identifier
    pub channel_id: String,

    /// Accept invalid TLS certificates on wss:// endpoints
    pub insecure: bool,

    /// Enable audio (default: true)
    pub audio: bool,

    /// Enable video (default: true)
    pub video: bool,

    /// Preferred audio codec, e.g. "OPUS"
    pub audio_codec_type: Option<String>,

    /// Preferred video codec, e.g. "VP9", "H264"
    pub video_codec_type: Option<String>,

    /// Audio bitrate hint in kbps
    pub audio_bit_rate: Option<u32>,

    /// Video bitrate hint in kbps
    pub video_bit_rate: Option<u32>,

    /// Client metadata forwarded to the SFU's auth webhook
    pub metadata: Option<serde_json::Value>,

    /// Metadata the SFU attaches to notify events about this client
    pub signaling_notify_metadata: Option<serde_json::Value>,

    /// Media direction (default: sendonly)
    pub role: Role,

    /// Request multistream
    pub multistream: bool,

    /// Request spotlight
    pub spotlight: bool,

    /// Number of spotlighted streams (only sent with `spotlight`)
    pub spotlight_number: Option<u32>,

    /// Fixed local UDP port for the media session
    pub port: Option<u16>,

    /// Request simulcast
    pub simulcast: bool,

    /// Value of the `sora_client` field in the connect request
    pub client_name: String,

    /// Liveness interval in milliseconds; no frame within it tears the connection down
    pub watchdog_timeout_ms: u64,

    /// Upper bound for sampling statistics for a pong, in milliseconds
    pub stats_timeout_ms: u64,

    /// Upper bound for each media session operation, in milliseconds
    pub media_timeout_ms: u64,

    /// Reconnection backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:5000/signaling".to_string(),
            channel_id: String::new(),
            insecure: false,
            audio: true,
            video: true,
            audio_codec_type: None,
            video_codec_type: None,
            audio_bit_rate: None,
            video_bit_rate: None,
            metadata: None,
            signaling_notify_metadata: None,
            role: Role::SendOnly,
            multistream: false,
            spotlight: false,
            spotlight_number: None,
            port: None,
            simulcast: false,
            client_name: format!("sora-signaling-rs {}", env!("CARGO_PKG_VERSION")),
            watchdog_timeout_ms: 30_000,
            stats_timeout_ms: 1000,
            media_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Create a config for a channel on the given signaling URL
    pub fn new(signaling_url: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    /// Liveness interval
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Statistics sampling bound
    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    /// Media session operation bound
    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }

    /// Load a config from a YAML or JSON file (chosen by extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents).map_err(|e| {
                Error::SerializationError(format!("Failed to parse {}: {}", path.display(), e))
            })?,
        };
        Ok(config)
    }

    /// Parse the signaling URL into an endpoint
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.signaling_url, self.insecure)
    }

    /// Validate the configuration
    ///
    /// Configuration errors are fatal: the client never retries them.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;

        if self.channel_id.trim().is_empty() {
            return Err(Error::InvalidConfig("channel_id must not be empty".to_string()));
        }

        if self.spotlight_number.is_some() && !self.spotlight {
            return Err(Error::InvalidConfig(
                "spotlight_number requires spotlight".to_string(),
            ));
        }

        if self.watchdog_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "watchdog_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.media_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "media_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.reconnect.validate()
    }
}

/// Media direction requested from the SFU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Publish only
    #[serde(rename = "sendonly")]
    SendOnly,
    /// Subscribe only
    #[serde(rename = "recvonly")]
    RecvOnly,
    /// Publish and subscribe
    #[serde(rename = "sendrecv")]
    SendRecv,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SendOnly => "sendonly",
            Role::RecvOnly => "recvonly",
            Role::SendRecv => "sendrecv",
        }
    }

    /// Whether local media is published
    pub fn sends(&self) -> bool {
        matches!(self, Role::SendOnly | Role::SendRecv)
    }

    /// Whether remote media is received
    pub fn receives(&self) -> bool {
        matches!(self, Role::RecvOnly | Role::SendRecv)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection backoff policy
///
/// Delays never decrease as the retry counter grows and never exceed
/// `backoff_max_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Give up after this many retries (default: retry forever)
    pub max_retries: Option<u32>,
    /// Delay before the first retry in milliseconds (default: 5000ms)
    pub backoff_initial_ms: u64,
    /// Maximum delay in milliseconds (default: 60000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff_initial_ms: 5000,
            backoff_max_ms: 60000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the delay before retry number `retry` (1-based)
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let multiplier = self.backoff_multiplier.max(1.0);

        let backoff_ms = (self.backoff_initial_ms as f64) * multiplier.powi(exponent);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        Duration::from_millis(backoff_ms as u64)
    }

    /// Check if retry number `retry` (1-based) is allowed
    pub fn should_retry(&self, retry: u32) -> bool {
        self.max_retries.map_or(true, |max| retry <= max)
    }

    fn validate(&self) -> Result<()> {
        if self.backoff_initial_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.backoff_initial_ms must be greater than 0".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect.backoff_max_ms ({}) is below backoff_initial_ms ({})",
                self.backoff_max_ms, self.backoff_initial_ms
            )));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Parsed signaling endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full signaling URL
    pub url: Url,
    /// TLS is used (wss://)
    pub secure: bool,
    /// Certificate verification is skipped
    pub insecure: bool,
}

impl Endpoint {
    /// Parse and validate a signaling URL
    pub fn parse(signaling_url: &str, insecure: bool) -> Result<Self> {
        let url = Url::parse(signaling_url).map_err(|e| {
            Error::InvalidConfig(format!("Invalid signaling URL '{}': {}", signaling_url, e))
        })?;

        let secure = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported signaling scheme '{}', expected ws or wss",
                    other
                )))
            }
        };

        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::InvalidConfig(format!(
                "Signaling URL '{}' has no host",
                signaling_url
            )));
        }

        Ok(Self {
            url,
            secure,
            insecure,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
