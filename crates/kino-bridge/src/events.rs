//! Normalized player events
//!
//! Engine callbacks are turned into [`PlayerEvent`]s by the command surface,
//! stamped into [`EventMessage`]s and fanned out to every attached sink:
//! - the parent frame (see `transport::FrameSink`)
//! - host bridges for embedded web views
//! - one local callback per event kind for hosts calling the surface directly

use crate::protocol::EventMessage;
use crate::types::QualityLevel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Every event name the surface emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "onReady")]
    Ready,
    #[serde(rename = "onPlay")]
    Play,
    #[serde(rename = "onPause")]
    Pause,
    #[serde(rename = "onEnded")]
    Ended,
    #[serde(rename = "onTimeUpdate")]
    TimeUpdate,
    #[serde(rename = "onProgress")]
    Progress,
    #[serde(rename = "onError")]
    Error,
    #[serde(rename = "onQualityChange")]
    QualityChange,
    #[serde(rename = "onFullscreenChange")]
    FullscreenChange,
    #[serde(rename = "onSeeking")]
    Seeking,
    #[serde(rename = "onSeeked")]
    Seeked,
    #[serde(rename = "onVolumeChange")]
    VolumeChange,
    #[serde(rename = "onWaiting")]
    Waiting,
    #[serde(rename = "onCanPlay")]
    CanPlay,
    #[serde(rename = "onManifestParsed")]
    ManifestParsed,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::Ready,
        EventKind::Play,
        EventKind::Pause,
        EventKind::Ended,
        EventKind::TimeUpdate,
        EventKind::Progress,
        EventKind::Error,
        EventKind::QualityChange,
        EventKind::FullscreenChange,
        EventKind::Seeking,
        EventKind::Seeked,
        EventKind::VolumeChange,
        EventKind::Waiting,
        EventKind::CanPlay,
        EventKind::ManifestParsed,
    ];

    /// Wire name, e.g. "onTimeUpdate"
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "onReady",
            EventKind::Play => "onPlay",
            EventKind::Pause => "onPause",
            EventKind::Ended => "onEnded",
            EventKind::TimeUpdate => "onTimeUpdate",
            EventKind::Progress => "onProgress",
            EventKind::Error => "onError",
            EventKind::QualityChange => "onQualityChange",
            EventKind::FullscreenChange => "onFullscreenChange",
            EventKind::Seeking => "onSeeking",
            EventKind::Seeked => "onSeeked",
            EventKind::VolumeChange => "onVolumeChange",
            EventKind::Waiting => "onWaiting",
            EventKind::CanPlay => "onCanPlay",
            EventKind::ManifestParsed => "onManifestParsed",
        }
    }

    /// Resolve a user-facing name.
    ///
    /// Accepts the short form ("play", "timeUpdate") as well as the wire
    /// form ("onPlay").
    pub fn from_name(name: &str) -> Option<Self> {
        let mut chars = name.chars();
        let prefixed = chars
            .next()
            .map(|first| format!("on{}{}", first.to_uppercase(), chars.as_str()));

        Self::ALL
            .into_iter()
            .find(|kind| prefixed.as_deref() == Some(kind.as_str()))
            .or_else(|| Self::ALL.into_iter().find(|kind| kind.as_str() == name))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `onError`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<bool>,
}

impl ErrorPayload {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            fatal: None,
        }
    }

    pub fn fatal(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
            fatal: Some(true),
        }
    }
}

/// Engine-agnostic event, one variant per [`EventKind`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready { duration: f64, is_live: bool },
    Play { current_time: f64 },
    Pause { current_time: f64 },
    Ended,
    TimeUpdate { current_time: f64, duration: f64, percentage: f64 },
    Progress { buffered: f64 },
    Error(ErrorPayload),
    QualityChange { quality: i64 },
    FullscreenChange { is_fullscreen: bool },
    Seeking { current_time: f64 },
    Seeked { current_time: f64 },
    VolumeChange { volume: f64, muted: bool },
    Waiting,
    CanPlay,
    ManifestParsed { qualities: Vec<QualityLevel>, is_live: bool },
}

impl PlayerEvent {
    /// Time update with the percentage derived from position and duration
    pub fn time_update(current_time: f64, duration: f64) -> Self {
        PlayerEvent::TimeUpdate {
            current_time,
            duration,
            percentage: percentage(current_time, duration),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::Ready { .. } => EventKind::Ready,
            PlayerEvent::Play { .. } => EventKind::Play,
            PlayerEvent::Pause { .. } => EventKind::Pause,
            PlayerEvent::Ended => EventKind::Ended,
            PlayerEvent::TimeUpdate { .. } => EventKind::TimeUpdate,
            PlayerEvent::Progress { .. } => EventKind::Progress,
            PlayerEvent::Error(_) => EventKind::Error,
            PlayerEvent::QualityChange { .. } => EventKind::QualityChange,
            PlayerEvent::FullscreenChange { .. } => EventKind::FullscreenChange,
            PlayerEvent::Seeking { .. } => EventKind::Seeking,
            PlayerEvent::Seeked { .. } => EventKind::Seeked,
            PlayerEvent::VolumeChange { .. } => EventKind::VolumeChange,
            PlayerEvent::Waiting => EventKind::Waiting,
            PlayerEvent::CanPlay => EventKind::CanPlay,
            PlayerEvent::ManifestParsed { .. } => EventKind::ManifestParsed,
        }
    }

    /// Structured payload as sent in `EventMessage::data`
    pub fn payload(&self) -> Value {
        match self {
            PlayerEvent::Ready { duration, is_live } => {
                json!({ "duration": duration, "isLive": is_live })
            }
            PlayerEvent::Play { current_time }
            | PlayerEvent::Pause { current_time }
            | PlayerEvent::Seeking { current_time }
            | PlayerEvent::Seeked { current_time } => json!({ "currentTime": current_time }),
            PlayerEvent::Ended | PlayerEvent::Waiting | PlayerEvent::CanPlay => json!({}),
            PlayerEvent::TimeUpdate { current_time, duration, percentage } => json!({
                "currentTime": current_time,
                "duration": duration,
                "percentage": percentage,
            }),
            PlayerEvent::Progress { buffered } => json!({ "buffered": buffered }),
            PlayerEvent::Error(err) => serde_json::to_value(err).unwrap_or_else(|_| json!({})),
            PlayerEvent::QualityChange { quality } => json!({ "quality": quality }),
            PlayerEvent::FullscreenChange { is_fullscreen } => {
                json!({ "isFullscreen": is_fullscreen })
            }
            PlayerEvent::VolumeChange { volume, muted } => {
                json!({ "volume": volume, "muted": muted })
            }
            PlayerEvent::ManifestParsed { qualities, is_live } => json!({
                "qualities": qualities,
                "isLive": is_live,
            }),
        }
    }
}

/// Playback percentage, 0 when the duration is unknown or zero
pub fn percentage(current_time: f64, duration: f64) -> f64 {
    let pct = current_time / duration * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

/// Destination for normalized events
pub trait EventSink: Send {
    fn deliver(&mut self, message: &EventMessage);
}

impl EventSink for mpsc::UnboundedSender<EventMessage> {
    fn deliver(&mut self, message: &EventMessage) {
        let _ = self.send(message.clone());
    }
}

/// Out-of-band channel offered by an embedding host (mobile web views).
///
/// Receives each event as JSON text of the Event schema.
pub trait HostBridge: Send + Sync {
    fn call_handler(&self, handler: &str, payload: String);
}

/// Forwards events to a named [`HostBridge`] handler
pub struct HostBridgeSink {
    handler: String,
    bridge: Arc<dyn HostBridge>,
}

impl HostBridgeSink {
    pub fn new(handler: impl Into<String>, bridge: Arc<dyn HostBridge>) -> Self {
        Self {
            handler: handler.into(),
            bridge,
        }
    }
}

impl EventSink for HostBridgeSink {
    fn deliver(&mut self, message: &EventMessage) {
        self.bridge.call_handler(&self.handler, message.to_json());
    }
}

type LocalCallback = Box<dyn FnMut(&Value) + Send>;

/// Fans normalized events out to sinks and local callbacks
#[derive(Default)]
pub struct EventEmitter {
    sinks: Vec<Box<dyn EventSink>>,
    callbacks: HashMap<EventKind, LocalCallback>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Register the callback for `kind`, replacing any previous one
    pub fn on(&mut self, kind: EventKind, callback: impl FnMut(&Value) + Send + 'static) {
        self.callbacks.insert(kind, Box::new(callback));
    }

    /// Register by name; unknown names are ignored and return false
    pub fn on_name(&mut self, name: &str, callback: impl FnMut(&Value) + Send + 'static) -> bool {
        match EventKind::from_name(name) {
            Some(kind) => {
                self.on(kind, callback);
                true
            }
            None => false,
        }
    }

    pub fn off(&mut self, kind: EventKind) {
        self.callbacks.remove(&kind);
    }

    pub fn off_name(&mut self, name: &str) {
        if let Some(kind) = EventKind::from_name(name) {
            self.off(kind);
        }
    }

    /// Deliver one event to every sink, then to its local callback
    pub fn emit(&mut self, event: PlayerEvent) -> EventMessage {
        let message = EventMessage::from_event(&event);

        for sink in &mut self.sinks {
            sink.deliver(&message);
        }

        debug!(event = %message.event, data = %message.data, "Player event");

        if let Some(callback) = self.callbacks.get_mut(&event.kind()) {
            callback(&message.data);
        }

        message
    }
}
