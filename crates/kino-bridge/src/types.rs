//! Core types for Kino Bridge

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire tag used to mark command responses (`<tag>Response`)
pub const DEFAULT_PROTOCOL_TAG: &str = "KinoBridge";

/// Default RPC deadline in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// MIME type probed for native HLS playback
pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// Unique identifier for a player session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One encoded quality level of an adaptive stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLevel {
    pub index: usize,
    pub height: u32,
    pub width: u32,
    pub bitrate: u64,
}

impl QualityLevel {
    /// Menu label, e.g. "720p"
    pub fn label(&self) -> String {
        format!("{}p", self.height)
    }
}

/// Quality level as returned by `getQualities`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub index: usize,
    pub height: u32,
    pub width: u32,
    pub bitrate: u64,
    pub label: String,
}

impl From<&QualityLevel> for QualityInfo {
    fn from(level: &QualityLevel) -> Self {
        Self {
            index: level.index,
            height: level.height,
            width: level.width,
            bitrate: level.bitrate,
            label: level.label(),
        }
    }
}

/// Read-only aggregate of the live player state.
///
/// Always computed on demand from the attached engines, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStateSnapshot {
    pub is_ready: bool,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_stopped: bool,
    pub is_ended: bool,
    pub is_seeking: bool,
    pub is_live: bool,
    pub is_fullscreen: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    pub speed: f64,
    pub quality: i64,
    pub buffered: f64,
}

impl Default for PlayerStateSnapshot {
    fn default() -> Self {
        Self {
            is_ready: false,
            is_playing: false,
            is_paused: true,
            is_stopped: true,
            is_ended: false,
            is_seeking: false,
            is_live: false,
            is_fullscreen: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            speed: 1.0,
            quality: 0,
            buffered: 0.0,
        }
    }
}

/// Source loading state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// No source requested yet, or destroyed
    Idle,
    /// Waiting for the streaming engine to parse the manifest
    Loading,
    /// Player engine constructed against a usable source
    Ready,
    /// Unsupported source or unrecoverable engine failure
    Error,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::Idle => write!(f, "idle"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Ready => write!(f, "ready"),
            LoadState::Error => write!(f, "error"),
        }
    }
}

/// How a source URL is attached to the media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// HLS manifest, needs the streaming engine or native support
    Hls,
    /// Progressive file (MP4, WebM, ...) assigned directly
    Progressive,
}

impl SourceKind {
    /// Classify a source URL.
    ///
    /// Relative URLs are accepted, so this looks at the raw string rather
    /// than requiring a parseable absolute URL.
    pub fn detect(url: &str) -> Self {
        if url.to_lowercase().contains(".m3u8") {
            SourceKind::Hls
        } else {
            SourceKind::Progressive
        }
    }
}

/// Remote controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Tag prefix of response messages
    pub protocol_tag: String,
    /// Deadline per request in milliseconds
    pub request_timeout_ms: u64,
    /// Origin of the player frame, or "*"
    pub target_origin: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            protocol_tag: DEFAULT_PROTOCOL_TAG.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            target_origin: "*".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Config targeting a specific player origin
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            target_origin: origin.into(),
            ..Default::default()
        }
    }

    /// Response type string, e.g. "KinoBridgeResponse"
    pub fn response_type(&self) -> String {
        response_type(&self.protocol_tag)
    }
}

/// Response type string for a protocol tag
pub fn response_type(tag: &str) -> String {
    format!("{}Response", tag)
}

/// Command surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Tag prefix of response messages
    pub protocol_tag: String,
    /// Origin allowed to send commands, or "*"
    pub allowed_origin: String,
    /// Target origin for forwarded events, or "*"
    pub event_target_origin: String,
    /// Version string reported by `getVersion`
    pub version: String,
    /// Options handed to the playback engine
    pub player: PlayerOptions,
    /// Options handed to the streaming engine
    pub streaming: StreamingConfig,
    /// Automatic recovery limits for fatal streaming errors
    pub recovery: RecoveryPolicy,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            protocol_tag: DEFAULT_PROTOCOL_TAG.to_string(),
            allowed_origin: "*".to_string(),
            event_target_origin: "*".to_string(),
            version: crate::VERSION.to_string(),
            player: PlayerOptions::default(),
            streaming: StreamingConfig::default(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

/// Streaming engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Demux in a worker when the environment allows it
    pub enable_worker: bool,
    /// Prefer low-latency live edge handling
    pub low_latency_mode: bool,
    /// Seconds of already-played media kept in the buffer
    pub back_buffer_length: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enable_worker: true,
            low_latency_mode: true,
            back_buffer_length: 90.0,
        }
    }
}

/// UI control shown by the playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Control {
    PlayLarge,
    Play,
    Progress,
    CurrentTime,
    Duration,
    Mute,
    Volume,
    Settings,
    Pip,
    Fullscreen,
}

/// Settings menu entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsMenu {
    Quality,
    Speed,
}

/// Playback engine construction options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    pub controls: Vec<Control>,
    pub settings: Vec<SettingsMenu>,
    /// Preferred height in the quality menu
    pub default_quality: u32,
    /// Heights offered in the quality menu
    pub quality_options: Vec<u32>,
    /// Initial playback rate
    pub speed: f64,
    /// Rates offered in the speed menu
    pub speed_options: Vec<f64>,
    /// Start playback once ready
    pub autoplay: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            controls: vec![
                Control::PlayLarge,
                Control::Play,
                Control::Progress,
                Control::CurrentTime,
                Control::Duration,
                Control::Mute,
                Control::Volume,
                Control::Settings,
                Control::Pip,
                Control::Fullscreen,
            ],
            settings: vec![SettingsMenu::Quality, SettingsMenu::Speed],
            default_quality: 720,
            quality_options: vec![1080, 720, 480, 360, 240],
            speed: 1.0,
            speed_options: vec![0.5, 0.75, 1.0, 1.25, 1.5, 2.0],
            autoplay: false,
        }
    }
}

/// Limits on automatic recovery after fatal streaming errors.
///
/// `None` retries on every fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    pub max_network_retries: Option<u32>,
    pub max_media_recoveries: Option<u32>,
}

impl RecoveryPolicy {
    /// Cap both recovery kinds
    pub fn capped(max: u32) -> Self {
        Self {
            max_network_retries: Some(max),
            max_media_recoveries: Some(max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_source_kind() {
        assert_eq!(SourceKind::detect("stream.m3u8"), SourceKind::Hls);
        assert_eq!(
            SourceKind::detect("https://cdn.example.com/live/Master.M3U8?token=1"),
            SourceKind::Hls
        );
        assert_eq!(SourceKind::detect("https://cdn.example.com/clip.mp4"), SourceKind::Progressive);
    }

    #[test]
    fn test_snapshot_defaults() {
        let state = PlayerStateSnapshot::default();
        assert!(!state.is_ready);
        assert!(state.is_paused);
        assert_eq!(state.duration, 0.0);
        assert_eq!(state.volume, 1.0);
        assert_eq!(state.speed, 1.0);
        assert!(!state.muted);
    }

    #[test]
    fn test_snapshot_wire_names() {
        let json = serde_json::to_value(PlayerStateSnapshot::default()).unwrap();
        assert_eq!(json["isReady"], false);
        assert_eq!(json["currentTime"], 0.0);
        assert_eq!(json["isFullscreen"], false);
    }

    #[test]
    fn test_load_state_display() {
        assert_eq!(LoadState::Loading.to_string(), "loading");
        assert_eq!(LoadState::Ready.to_string(), "ready");
    }

    #[test]
    fn test_quality_label() {
        let level = QualityLevel { index: 1, height: 720, width: 1280, bitrate: 2_800_000 };
        assert_eq!(level.label(), "720p");
        assert_eq!(QualityInfo::from(&level).label, "720p");
    }

    #[test]
    fn test_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_timeout_ms, 5000);
        assert_eq!(config.target_origin, "*");
        assert_eq!(config.response_type(), "KinoBridgeResponse");

        let surface = SurfaceConfig::default();
        assert_eq!(surface.streaming.back_buffer_length, 90.0);
        assert_eq!(surface.player.default_quality, 720);
        assert_eq!(surface.recovery, RecoveryPolicy::default());
    }
}
