//! Collaborator interfaces driven by the command surface
//!
//! The surface never decodes media itself. It drives:
//! - a [`PlaybackEngine`] (imperative controls, UI chrome)
//! - a [`StreamingEngine`] (manifest loading, level switching, recovery)
//! - a [`MediaElement`] (the underlying media sink for direct sources)
//!
//! all obtained from a [`Platform`]. Engines report back by pushing
//! [`EngineEvent`]s through the [`EngineEventSender`] they were created with.

pub mod headless;
#[cfg(feature = "hls")]
pub mod hls;

use crate::types::{PlayerOptions, QualityLevel, StreamingConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Imperative controls and readable properties of the playback engine
pub trait PlaybackEngine: Send {
    // Playback
    fn play(&mut self);
    fn pause(&mut self);
    fn toggle_play(&mut self);
    fn stop(&mut self);
    fn restart(&mut self);

    // Position
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, seconds: f64);
    fn forward(&mut self, seconds: f64);
    fn rewind(&mut self, seconds: f64);
    fn duration(&self) -> f64;
    /// Buffered fraction of the media, 0..=1
    fn buffered(&self) -> f64;

    // Volume and speed
    fn volume(&self) -> f64;
    fn set_volume(&mut self, level: f64);
    fn muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool);
    fn speed(&self) -> f64;
    fn set_speed(&mut self, rate: f64);

    // Flags
    fn playing(&self) -> bool;
    fn paused(&self) -> bool;
    fn stopped(&self) -> bool;
    fn ended(&self) -> bool;
    fn seeking(&self) -> bool;

    // Fullscreen
    fn fullscreen_active(&self) -> bool;
    fn enter_fullscreen(&mut self);
    fn exit_fullscreen(&mut self);
    fn toggle_fullscreen(&mut self);

    // Display
    /// `None` toggles the current state
    fn toggle_captions(&mut self, show: Option<bool>);
    fn pip_supported(&self) -> bool;
    fn set_pip(&mut self, active: bool);
    fn toggle_controls(&mut self, show: bool);

    /// Offer quality menu entries (heights), preselecting `selected`
    fn set_quality_options(&mut self, options: &[u32], selected: u32);

    /// Release resources; no further events are expected afterwards
    fn destroy(&mut self);
}

/// Adaptive-streaming engine lifecycle and level control
pub trait StreamingEngine: Send {
    /// Begin asynchronous manifest fetch and parse.
    ///
    /// Completion is reported as [`StreamingEvent::ManifestParsed`].
    fn load_source(&mut self, url: &str);
    fn attach_media(&mut self, media: &mut dyn MediaElement);

    /// Levels known from the parsed manifest, in manifest order
    fn levels(&self) -> Vec<QualityLevel>;
    /// Selected level index, or -1 for automatic selection
    fn current_level(&self) -> i64;
    fn set_current_level(&mut self, index: i64);
    fn is_live(&self) -> bool;

    /// Restart loading after a fatal network error
    fn start_load(&mut self);
    /// Reset decoder state after a fatal media error
    fn recover_media_error(&mut self);
    fn destroy(&mut self);
}

/// The media sink a source is attached to
pub trait MediaElement: Send {
    fn src(&self) -> String;
    fn set_src(&mut self, url: &str);
    /// Native support probe for a MIME type
    fn can_play_type(&self, mime: &str) -> bool;
}

/// Execution environment: capability probes and engine factories
pub trait Platform: Send {
    /// The element the player renders into, if it exists
    fn media_element(&mut self) -> Option<&mut dyn MediaElement>;

    /// Whether the environment has the decoding primitives the streaming
    /// engine needs
    fn streaming_supported(&self) -> bool;

    fn create_streaming_engine(
        &mut self,
        config: &StreamingConfig,
        events: EngineEventSender,
    ) -> Box<dyn StreamingEngine>;

    /// Build the playback engine around the media element
    fn create_player(
        &mut self,
        options: &PlayerOptions,
        events: EngineEventSender,
    ) -> Box<dyn PlaybackEngine>;
}

/// Raw playback engine callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Ready,
    Play,
    Pause,
    Ended,
    TimeUpdate,
    Progress,
    Seeking,
    Seeked,
    VolumeChange,
    Waiting,
    CanPlay,
    EnterFullscreen,
    ExitFullscreen,
    /// Quality picked in the engine's own menu (height)
    QualityChange(i64),
    /// Media error, with the engine's message if it has one
    Error(Option<String>),
}

/// Streaming error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamErrorKind {
    Network,
    Media,
    Mux,
    KeySystem,
    Other,
}

impl StreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamErrorKind::Network => "network",
            StreamErrorKind::Media => "media",
            StreamErrorKind::Mux => "mux",
            StreamErrorKind::KeySystem => "keySystem",
            StreamErrorKind::Other => "other",
        }
    }
}

/// Raw streaming engine callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingEvent {
    ManifestParsed,
    Error {
        kind: StreamErrorKind,
        fatal: bool,
        details: String,
    },
}

/// Callback from either engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Playback(PlaybackEvent),
    Streaming(StreamingEvent),
}

/// Engine event tagged with the generation of the instance that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEngineEvent {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Handle engines use to report events back to the surface.
///
/// Each engine instance gets its own generation so events raised by an
/// instance that has since been torn down can be told apart.
#[derive(Debug, Clone)]
pub struct EngineEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEngineEvent>,
}

impl EngineEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEngineEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn playback(&self, event: PlaybackEvent) {
        self.send(EngineEvent::Playback(event));
    }

    pub fn streaming(&self, event: StreamingEvent) {
        self.send(EngineEvent::Streaming(event));
    }

    fn send(&self, event: EngineEvent) {
        // The surface may already be gone during shutdown
        let _ = self.tx.send(TaggedEngineEvent {
            generation: self.generation,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EngineEventSender::new(7, tx);

        sender.playback(PlaybackEvent::Play);
        sender.streaming(StreamingEvent::ManifestParsed);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.generation, 7);
        assert_eq!(first.event, EngineEvent::Playback(PlaybackEvent::Play));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.event, EngineEvent::Streaming(StreamingEvent::ManifestParsed));
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(StreamErrorKind::Network.as_str(), "network");
        assert_eq!(StreamErrorKind::KeySystem.as_str(), "keySystem");
    }
}
