use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vpcore::candidates::CandidateBatchPolicy;
use vpcore::control::CONTROL_CHANNEL_LABEL;
use vpcore::media::AudioConstraints;
use vpcore::sdp::OpusParams;

/// Prefix of environment variables that override file/default settings.
pub const ENV_PREFIX: &str = "VOICE_PORTAL_";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Client-wide settings. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin of the portal backend; REST calls go to `{base_url}/api/...`
    /// and signaling to `{base_url}{agent path}/webrtc/offer`.
    pub base_url: String,
    pub ice_servers: Vec<IceServer>,
    pub candidate_batch: CandidateBatchPolicy,
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// `None` disables the control-channel heartbeat.
    #[serde(with = "opt_secs")]
    pub heartbeat_interval: Option<Duration>,
    pub audio: AudioConstraints,
    pub opus: OpusParams,
    pub control_channel_label: String,
    /// Tell the agent about local mute toggles over the control channel.
    pub announce_mute: bool,
    /// Where the bearer token is persisted. In-memory only when unset.
    pub token_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            candidate_batch: CandidateBatchPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            audio: AudioConstraints::default(),
            opus: OpusParams::default(),
            control_channel_label: CONTROL_CHANNEL_LABEL.to_string(),
            announce_mute: false,
            token_file: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("ice_servers", &self.ice_servers.len())
            .field("candidate_batch", &self.candidate_batch)
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("announce_mute", &self.announce_mute)
            .field("token_file", &self.token_file)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads `path` (or defaults) and applies `VOICE_PORTAL_*` overrides from
    /// the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Applies `VOICE_PORTAL_*` key/value overrides. Unrelated keys are
    /// ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            let invalid = || ConfigError::InvalidValue {
                key: key.as_ref().to_string(),
                value: value.to_string(),
            };

            match name {
                "BASE_URL" => self.base_url = value.to_string(),
                "ICE_SERVERS" => {
                    self.ice_servers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(IceServer::stun)
                        .collect();
                }
                "CONNECT_TIMEOUT_SECS" => {
                    self.connect_timeout =
                        Duration::from_secs(value.parse().map_err(|_| invalid())?);
                }
                "HEARTBEAT_SECS" => {
                    let secs: u64 = value.parse().map_err(|_| invalid())?;
                    self.heartbeat_interval = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "CANDIDATE_BATCH_SIZE" => {
                    self.candidate_batch.max_batch = value.parse().map_err(|_| invalid())?;
                }
                "CANDIDATE_BATCH_DELAY_MS" => {
                    self.candidate_batch.max_delay =
                        Duration::from_millis(value.parse().map_err(|_| invalid())?);
                }
                "ANNOUNCE_MUTE" => {
                    self.announce_mute = parse_bool(value).ok_or_else(invalid)?;
                }
                "TOKEN_FILE" => {
                    self.token_file = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                _ => {
                    log::debug!(target: "Client", "Ignoring unknown config override {}", key.as_ref());
                }
            }
        }
        Ok(())
    }

    /// REST endpoint URL for `path` (relative to `/api`).
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            vpcore::portal::API_PREFIX,
            path.trim_start_matches('/')
        )
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|s| *s > 0)
            .map(Duration::from_secs))
    }
}
