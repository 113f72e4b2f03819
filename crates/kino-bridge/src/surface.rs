//! Command Surface - the in-page adapter
//!
//! Translates named commands into calls against the attached engines and
//! forwards engine callbacks outward as normalized events. Commands issued
//! while no engine is attached are silent no-ops; queries fall back to the
//! defaults of [`PlayerStateSnapshot`], except `get_volume` which reads 0.
//!
//! Engines report through a generation-tagged channel. Events are drained
//! after every command and continuously by [`CommandSurface::run`].

use crate::command::Command;
use crate::engine::{
    EngineEvent, EngineEventSender, PlaybackEngine, PlaybackEvent, Platform, StreamErrorKind,
    StreamingEvent, TaggedEngineEvent,
};
use crate::events::{ErrorPayload, EventEmitter, EventKind, EventSink, HostBridge, HostBridgeSink, PlayerEvent};
use crate::protocol::{CommandRequest, CommandResponse, TransportMessage};
use crate::session::PlayerSession;
use crate::transport::{Envelope, FrameSink, Inbox, TargetOrigin, WindowHandle};
use crate::types::{
    LoadState, PlayerOptions, PlayerStateSnapshot, QualityInfo, QualityLevel, SourceKind,
    SurfaceConfig, HLS_MIME_TYPE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

enum Inbound {
    Envelope(Option<Envelope>),
    Engine(TaggedEngineEvent),
}

/// In-page adapter owning one player session
pub struct CommandSurface<P: Platform> {
    config: SurfaceConfig,
    platform: P,
    session: PlayerSession,
    emitter: EventEmitter,
    source: Option<String>,
    engine_tx: mpsc::UnboundedSender<TaggedEngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<TaggedEngineEvent>,
}

impl<P: Platform> CommandSurface<P> {
    pub fn new(platform: P, config: SurfaceConfig) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let session = PlayerSession::new();
        info!(session_id = %session.id(), version = %config.version, "Command surface created");

        Self {
            config,
            platform,
            session,
            emitter: EventEmitter::new(),
            source: None,
            engine_tx,
            engine_rx,
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn session(&self) -> &PlayerSession {
        &self.session
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn load_state(&self) -> LoadState {
        self.session.load_state()
    }

    // ========================================================================
    // Event outlets
    // ========================================================================

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.emitter.add_sink(sink);
    }

    /// Forward every event to a host bridge handler as JSON text
    pub fn add_host_bridge(&mut self, handler: &str, bridge: Arc<dyn HostBridge>) {
        self.emitter.add_sink(Box::new(HostBridgeSink::new(handler, bridge)));
    }

    /// Forward every event to the embedding window
    pub fn attach_parent(&mut self, parent: WindowHandle, own: WindowHandle) {
        let target = TargetOrigin::parse(&self.config.event_target_origin);
        debug!(parent = %parent.origin(), %target, "Forwarding events to parent window");
        self.emitter.add_sink(Box::new(FrameSink::new(parent, own, target)));
    }

    /// Register the local callback for an event name ("play", "onPlay").
    ///
    /// Replaces the previous callback for that event. Unknown names are
    /// ignored and return false.
    pub fn on(&mut self, name: &str, callback: impl FnMut(&Value) + Send + 'static) -> bool {
        self.emitter.on_name(name, callback)
    }

    pub fn on_kind(&mut self, kind: EventKind, callback: impl FnMut(&Value) + Send + 'static) {
        self.emitter.on(kind, callback);
    }

    pub fn off(&mut self, name: &str) {
        self.emitter.off_name(name);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run a request and build its correlated response
    #[instrument(skip(self, request), fields(action = %request.action, request_id = request.request_id))]
    pub fn handle_request(&mut self, request: &CommandRequest) -> CommandResponse {
        let tag = self.config.protocol_tag.clone();
        match Command::parse(&request.action, &request.args) {
            Ok(command) => CommandResponse::ok(&tag, request.request_id, self.execute(command)),
            Err(e) => {
                warn!(error = %e, "Rejecting request");
                CommandResponse::err(&tag, request.request_id, e.to_string())
            }
        }
    }

    /// Run a command, then deliver the engine events it caused
    pub fn execute(&mut self, command: Command) -> Value {
        debug!(action = command.action(), "Executing command");
        let result = self.apply(command);
        self.pump_engine_events();
        result
    }

    fn apply(&mut self, command: Command) -> Value {
        match command {
            Command::Play => self.with_player(|p| p.play()),
            Command::Pause => self.with_player(|p| p.pause()),
            Command::TogglePlay => self.with_player(|p| p.toggle_play()),
            Command::Stop => self.with_player(|p| {
                p.stop();
                p.set_current_time(0.0);
            }),
            Command::Restart => self.with_player(|p| p.restart()),

            Command::Seek(seconds) => self.with_player(|p| p.set_current_time(seconds)),
            Command::Forward(seconds) => self.with_player(|p| p.forward(seconds)),
            Command::Rewind(seconds) => self.with_player(|p| p.rewind(seconds)),

            Command::SetVolume(level) => self.with_player(|p| p.set_volume(level.clamp(0.0, 1.0))),
            Command::GetVolume => json!(self.get_volume()),
            Command::SetMuted(muted) => self.with_player(|p| p.set_muted(muted)),
            Command::IsMuted => json!(self.is_muted()),

            Command::SetSpeed(rate) => self.with_player(|p| p.set_speed(rate)),
            Command::GetSpeed => json!(self.get_speed()),

            Command::SetQuality(Some(quality)) => {
                self.select_quality(quality);
                Value::Null
            }
            Command::SetQuality(None) => {
                debug!("Ignoring non-numeric quality");
                Value::Null
            }
            Command::GetQuality => json!(self.get_quality()),
            Command::GetQualities => json!(self.get_qualities()),

            Command::EnterFullscreen => self.with_player(|p| p.enter_fullscreen()),
            Command::ExitFullscreen => self.with_player(|p| p.exit_fullscreen()),
            Command::ToggleFullscreen => self.with_player(|p| p.toggle_fullscreen()),
            Command::IsFullscreen => json!(self.is_fullscreen()),

            Command::LoadSource { url, autoplay } => {
                self.begin_source(&url, autoplay);
                Value::Null
            }
            Command::GetSource => json!(self.get_source()),

            Command::GetState => serde_json::to_value(self.get_state()).unwrap_or(Value::Null),
            Command::GetCurrentTime => json!(self.get_current_time()),
            Command::GetDuration => json!(self.get_duration()),
            Command::GetBuffered => json!(self.get_buffered()),
            Command::IsPlaying => json!(self.is_playing()),
            Command::IsPaused => json!(self.is_paused()),
            Command::IsLive => json!(self.is_live()),
            Command::IsReady => json!(self.is_ready()),

            Command::ToggleCaptions(show) => self.with_player(|p| p.toggle_captions(show)),
            Command::EnterPip => self.with_player(|p| {
                if p.pip_supported() {
                    p.set_pip(true);
                }
            }),
            Command::ExitPip => self.with_player(|p| p.set_pip(false)),
            Command::ShowControls => self.with_player(|p| p.toggle_controls(true)),
            Command::HideControls => self.with_player(|p| p.toggle_controls(false)),

            Command::Destroy => {
                info!(session_id = %self.session.id(), "Destroying player session");
                self.session.destroy();
                self.source = None;
                Value::Null
            }
            Command::GetVersion => json!(self.config.version),
        }
    }

    fn with_player(&mut self, f: impl FnOnce(&mut dyn PlaybackEngine)) -> Value {
        match self.session.player.as_deref_mut() {
            Some(player) => f(player),
            None => debug!("No player attached, command ignored"),
        }
        Value::Null
    }

    fn read_player<T>(&self, default: T, f: impl FnOnce(&dyn PlaybackEngine) -> T) -> T {
        match self.session.player.as_deref() {
            Some(player) => f(player),
            None => default,
        }
    }

    // ========================================================================
    // Typed commands
    // ========================================================================

    pub fn play(&mut self) {
        self.execute(Command::Play);
    }

    pub fn pause(&mut self) {
        self.execute(Command::Pause);
    }

    pub fn toggle_play(&mut self) {
        self.execute(Command::TogglePlay);
    }

    /// Stop playback and rewind to the start
    pub fn stop(&mut self) {
        self.execute(Command::Stop);
    }

    pub fn restart(&mut self) {
        self.execute(Command::Restart);
    }

    pub fn seek(&mut self, seconds: f64) {
        self.execute(Command::Seek(seconds));
    }

    pub fn forward(&mut self, seconds: f64) {
        self.execute(Command::Forward(seconds));
    }

    pub fn rewind(&mut self, seconds: f64) {
        self.execute(Command::Rewind(seconds));
    }

    /// Set the volume, clamped to 0..=1
    pub fn set_volume(&mut self, level: f64) {
        self.execute(Command::SetVolume(level));
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.execute(Command::SetMuted(muted));
    }

    pub fn set_speed(&mut self, rate: f64) {
        self.execute(Command::SetSpeed(rate));
    }

    /// Request a quality by height; non-positive selects automatic
    pub fn set_quality(&mut self, quality: i64) {
        self.execute(Command::SetQuality(Some(quality)));
    }

    pub fn enter_fullscreen(&mut self) {
        self.execute(Command::EnterFullscreen);
    }

    pub fn exit_fullscreen(&mut self) {
        self.execute(Command::ExitFullscreen);
    }

    pub fn toggle_fullscreen(&mut self) {
        self.execute(Command::ToggleFullscreen);
    }

    pub fn load_source(&mut self, url: &str, autoplay: bool) {
        self.execute(Command::LoadSource {
            url: url.to_string(),
            autoplay,
        });
    }

    pub fn toggle_captions(&mut self, show: Option<bool>) {
        self.execute(Command::ToggleCaptions(show));
    }

    pub fn enter_pip(&mut self) {
        self.execute(Command::EnterPip);
    }

    pub fn exit_pip(&mut self) {
        self.execute(Command::ExitPip);
    }

    pub fn show_controls(&mut self) {
        self.execute(Command::ShowControls);
    }

    pub fn hide_controls(&mut self) {
        self.execute(Command::HideControls);
    }

    pub fn destroy(&mut self) {
        self.execute(Command::Destroy);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fresh snapshot of the live engine state
    pub fn get_state(&self) -> PlayerStateSnapshot {
        let mut state = PlayerStateSnapshot {
            is_ready: self.session.ready,
            is_live: self.session.live,
            quality: self.session.quality,
            ..Default::default()
        };

        if let Some(player) = self.session.player.as_deref() {
            state.is_playing = player.playing();
            state.is_paused = player.paused();
            state.is_stopped = player.stopped();
            state.is_ended = player.ended();
            state.is_seeking = player.seeking();
            state.is_fullscreen = player.fullscreen_active();
            state.current_time = player.current_time();
            state.duration = player.duration();
            state.volume = player.volume();
            state.muted = player.muted();
            state.speed = player.speed();
            state.buffered = player.buffered();
        }

        state
    }

    pub fn get_current_time(&self) -> f64 {
        self.read_player(0.0, |p| p.current_time())
    }

    pub fn get_duration(&self) -> f64 {
        self.read_player(0.0, |p| p.duration())
    }

    pub fn get_buffered(&self) -> f64 {
        self.read_player(0.0, |p| p.buffered())
    }

    pub fn get_volume(&self) -> f64 {
        self.read_player(0.0, |p| p.volume())
    }

    pub fn is_muted(&self) -> bool {
        self.read_player(false, |p| p.muted())
    }

    pub fn get_speed(&self) -> f64 {
        self.read_player(1.0, |p| p.speed())
    }

    pub fn is_playing(&self) -> bool {
        self.read_player(false, |p| p.playing())
    }

    pub fn is_paused(&self) -> bool {
        self.read_player(true, |p| p.paused())
    }

    pub fn is_fullscreen(&self) -> bool {
        self.read_player(false, |p| p.fullscreen_active())
    }

    pub fn is_live(&self) -> bool {
        self.session.live
    }

    pub fn is_ready(&self) -> bool {
        self.session.ready
    }

    /// Selected height, 0 while automatic
    pub fn get_quality(&self) -> i64 {
        self.session.quality
    }

    /// Levels of the attached stream, in manifest order
    pub fn get_qualities(&self) -> Vec<QualityInfo> {
        self.levels().iter().map(QualityInfo::from).collect()
    }

    /// Current source URL, empty when nothing is loaded
    pub fn get_source(&mut self) -> String {
        if self.session.streaming.is_none() {
            if let Some(media) = self.platform.media_element() {
                let src = media.src();
                if !src.is_empty() {
                    return src;
                }
            }
        }
        self.source.clone().unwrap_or_default()
    }

    pub fn get_version(&self) -> &str {
        &self.config.version
    }

    fn levels(&self) -> Vec<QualityLevel> {
        self.session
            .streaming
            .as_deref()
            .map(|s| s.levels())
            .unwrap_or_default()
    }

    // ========================================================================
    // Source loading
    // ========================================================================

    #[instrument(skip(self), fields(session_id = %self.session.id()))]
    fn begin_source(&mut self, url: &str, autoplay: bool) {
        if self.platform.media_element().is_none() {
            warn!("No media element to attach the source to");
            self.emit(PlayerEvent::Error(ErrorPayload::message("Video element not found")));
            return;
        }

        self.session.detach_streaming();
        self.session.begin_load(autoplay);
        self.session.live = false;
        self.session.quality = 0;
        self.source = Some(url.to_string());
        self.session.set_load_state(LoadState::Loading);

        match SourceKind::detect(url) {
            SourceKind::Hls if self.platform.streaming_supported() => {
                let generation = self.session.next_generation();
                let events = EngineEventSender::new(generation, self.engine_tx.clone());
                let mut streaming = self
                    .platform
                    .create_streaming_engine(&self.config.streaming, events);

                streaming.load_source(url);
                if let Some(media) = self.platform.media_element() {
                    streaming.attach_media(media);
                }

                self.session.streaming = Some(streaming);
                self.session.streaming_generation = generation;
                info!(generation, "Streaming engine attached, waiting for manifest");
            }
            SourceKind::Hls => {
                let native = match self.platform.media_element() {
                    Some(media) if media.can_play_type(HLS_MIME_TYPE) => {
                        media.set_src(url);
                        true
                    }
                    _ => false,
                };

                if native {
                    info!("Using native HLS playback");
                    self.init_player(autoplay);
                } else {
                    warn!("HLS not supported in this environment");
                    self.emit(PlayerEvent::Error(ErrorPayload::message("HLS not supported")));
                    self.session.set_load_state(LoadState::Error);
                }
            }
            SourceKind::Progressive => {
                if let Some(media) = self.platform.media_element() {
                    media.set_src(url);
                }
                self.init_player(autoplay);
            }
        }
    }

    /// Build a fresh playback engine, replacing the current one
    fn init_player(&mut self, autoplay: bool) {
        self.session.detach_player();
        self.session.ready = false;

        let generation = self.session.next_generation();
        let events = EngineEventSender::new(generation, self.engine_tx.clone());
        let options = PlayerOptions {
            autoplay,
            ..self.config.player.clone()
        };

        self.session.player = Some(self.platform.create_player(&options, events));
        self.session.player_generation = generation;
        self.session.set_load_state(LoadState::Ready);
    }

    /// Offer the stream's heights in the player's quality menu
    fn offer_quality_options(&mut self, levels: &[QualityLevel]) {
        let mut heights: Vec<u32> = levels.iter().map(|l| l.height).collect();
        heights.dedup();
        let Some(&first) = heights.first() else {
            return;
        };

        let preferred = self.config.player.default_quality;
        let selected = if heights.contains(&preferred) { preferred } else { first };

        if let Some(player) = self.session.player.as_deref_mut() {
            player.set_quality_options(&heights, selected);
        }
    }

    /// Point the streaming engine at the level with `quality` as height.
    ///
    /// Returns false when no such level exists.
    fn select_quality(&mut self, quality: i64) -> bool {
        let Some(streaming) = self.session.streaming.as_deref_mut() else {
            debug!(quality, "No streaming engine, quality request ignored");
            return false;
        };

        if quality <= 0 {
            streaming.set_current_level(-1);
            self.session.quality = 0;
            return true;
        }

        match streaming.levels().iter().find(|l| i64::from(l.height) == quality) {
            Some(level) => {
                streaming.set_current_level(level.index as i64);
                self.session.quality = quality;
                true
            }
            None => {
                debug!(quality, "No level with that height, quality request ignored");
                false
            }
        }
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    /// Deliver every queued engine event
    pub fn pump_engine_events(&mut self) {
        while let Ok(tagged) = self.engine_rx.try_recv() {
            self.handle_engine_event(tagged);
        }
    }

    pub fn handle_engine_event(&mut self, tagged: TaggedEngineEvent) {
        match tagged.event {
            EngineEvent::Playback(event) => {
                if self.session.is_current_player(tagged.generation) {
                    self.on_playback_event(event);
                } else {
                    debug!(generation = tagged.generation, ?event, "Dropping event from replaced player");
                }
            }
            EngineEvent::Streaming(event) => {
                if self.session.is_current_streaming(tagged.generation) {
                    self.on_streaming_event(event);
                } else {
                    debug!(generation = tagged.generation, ?event, "Dropping event from replaced streaming engine");
                }
            }
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        let normalized = match event {
            PlaybackEvent::Ready => {
                self.session.ready = true;
                PlayerEvent::Ready {
                    duration: self.get_duration(),
                    is_live: self.session.live,
                }
            }
            PlaybackEvent::Play => PlayerEvent::Play {
                current_time: self.get_current_time(),
            },
            PlaybackEvent::Pause => PlayerEvent::Pause {
                current_time: self.get_current_time(),
            },
            PlaybackEvent::Ended => PlayerEvent::Ended,
            PlaybackEvent::TimeUpdate => {
                PlayerEvent::time_update(self.get_current_time(), self.get_duration())
            }
            PlaybackEvent::Progress => PlayerEvent::Progress {
                buffered: self.get_buffered(),
            },
            PlaybackEvent::Seeking => PlayerEvent::Seeking {
                current_time: self.get_current_time(),
            },
            PlaybackEvent::Seeked => PlayerEvent::Seeked {
                current_time: self.get_current_time(),
            },
            PlaybackEvent::VolumeChange => PlayerEvent::VolumeChange {
                volume: self.get_volume(),
                muted: self.is_muted(),
            },
            PlaybackEvent::Waiting => PlayerEvent::Waiting,
            PlaybackEvent::CanPlay => PlayerEvent::CanPlay,
            PlaybackEvent::EnterFullscreen => PlayerEvent::FullscreenChange { is_fullscreen: true },
            PlaybackEvent::ExitFullscreen => PlayerEvent::FullscreenChange { is_fullscreen: false },
            PlaybackEvent::QualityChange(quality) => {
                // Without a streaming engine the player's own choice stands
                if !self.select_quality(quality) && self.session.streaming.is_none() {
                    self.session.quality = quality.max(0);
                }
                PlayerEvent::QualityChange { quality }
            }
            PlaybackEvent::Error(message) => PlayerEvent::Error(ErrorPayload::message(
                message.unwrap_or_else(|| "Unknown error".to_string()),
            )),
        };

        self.emit(normalized);
    }

    fn on_streaming_event(&mut self, event: StreamingEvent) {
        match event {
            StreamingEvent::ManifestParsed => {
                let (levels, live) = match self.session.streaming.as_deref() {
                    Some(streaming) => (streaming.levels(), streaming.is_live()),
                    None => return,
                };
                info!(levels = levels.len(), live, "Manifest parsed");

                self.session.live = live;
                self.emit(PlayerEvent::ManifestParsed {
                    qualities: levels.clone(),
                    is_live: live,
                });
                self.init_player(self.session.autoplay);
                self.offer_quality_options(&levels);
            }
            StreamingEvent::Error { kind, fatal: false, details } => {
                warn!(kind = kind.as_str(), %details, "Non-fatal streaming error");
            }
            StreamingEvent::Error { kind, fatal: true, details } => {
                warn!(kind = kind.as_str(), %details, "Fatal streaming error");
                self.on_fatal_streaming_error(kind);
            }
        }
    }

    fn on_fatal_streaming_error(&mut self, kind: StreamErrorKind) {
        let policy = self.config.recovery;

        match kind {
            StreamErrorKind::Network => {
                self.emit(PlayerEvent::Error(ErrorPayload::fatal("Network error", kind.as_str())));
                if within(policy.max_network_retries, self.session.network_retries) {
                    self.session.network_retries += 1;
                    info!(attempt = self.session.network_retries, "Reloading stream");
                    if let Some(streaming) = self.session.streaming.as_deref_mut() {
                        streaming.start_load();
                    }
                } else {
                    warn!("Network retries exhausted");
                    self.session.set_load_state(LoadState::Error);
                }
            }
            StreamErrorKind::Media => {
                self.emit(PlayerEvent::Error(ErrorPayload::fatal("Media error", kind.as_str())));
                if within(policy.max_media_recoveries, self.session.media_recoveries) {
                    self.session.media_recoveries += 1;
                    info!(attempt = self.session.media_recoveries, "Recovering media error");
                    if let Some(streaming) = self.session.streaming.as_deref_mut() {
                        streaming.recover_media_error();
                    }
                } else {
                    warn!("Media recoveries exhausted");
                    self.session.set_load_state(LoadState::Error);
                }
            }
            other => {
                self.emit(PlayerEvent::Error(ErrorPayload::fatal("Fatal error", other.as_str())));
                self.session.set_load_state(LoadState::Error);
            }
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.emitter.emit(event);
    }

    // ========================================================================
    // Message loop
    // ========================================================================

    /// Answer one envelope from another window
    pub fn handle_envelope(&mut self, own: &WindowHandle, envelope: Envelope) {
        let allowed = TargetOrigin::parse(&self.config.allowed_origin);
        if !allowed.matches(&envelope.origin) {
            warn!(origin = %envelope.origin, "Ignoring message from foreign origin");
            return;
        }

        let request = match TransportMessage::decode(&envelope.data, &self.config.protocol_tag) {
            Some(TransportMessage::Request(request)) => request,
            _ => {
                debug!(origin = %envelope.origin, "Ignoring non-request message");
                return;
            }
        };

        let response = self.handle_request(&request);

        if let Some(source) = envelope.source {
            let reply = TransportMessage::from(response).to_value();
            if let Err(e) = source.post_message(reply, &TargetOrigin::parse(&envelope.origin), own) {
                warn!(error = %e, request_id = request.request_id, "Could not deliver response");
            }
        }
    }

    /// Serve requests from `inbox` and forward engine events.
    ///
    /// Returns once the inbox closes. A surface attached to its parent holds
    /// a handle to its own window, so in that setup the task runs until it is
    /// aborted.
    pub async fn run(mut self, own: WindowHandle, mut inbox: Inbox) -> Self {
        info!(origin = %own.origin(), "Command surface listening");
        self.pump_engine_events();

        loop {
            let next = tokio::select! {
                envelope = inbox.recv() => Inbound::Envelope(envelope),
                Some(tagged) = self.engine_rx.recv() => Inbound::Engine(tagged),
            };

            match next {
                Inbound::Envelope(Some(envelope)) => self.handle_envelope(&own, envelope),
                Inbound::Envelope(None) => break,
                Inbound::Engine(tagged) => {
                    self.handle_engine_event(tagged);
                    self.pump_engine_events();
                }
            }
        }

        info!("Command surface stopped");
        self
    }
}

fn within(cap: Option<u32>, attempts: u32) -> bool {
    cap.map_or(true, |max| attempts < max)
}
