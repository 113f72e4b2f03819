//! Headless engines
//!
//! Deterministic in-memory implementations of the collaborator traits. No
//! media is decoded; state changes happen immediately and raise the same
//! callbacks a real engine would. Used by the CLI harness and the tests.

use super::{
    EngineEventSender, MediaElement, PlaybackEngine, PlaybackEvent, Platform, StreamingEngine,
    StreamingEvent,
};
use crate::types::{PlayerOptions, QualityLevel, StreamingConfig, HLS_MIME_TYPE};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Factory producing the streaming engine for a [`HeadlessPlatform`]
pub type StreamingFactory =
    Box<dyn FnMut(&StreamingConfig, EngineEventSender) -> Box<dyn StreamingEngine> + Send>;

/// Media element with a settable source
#[derive(Debug, Clone, Default)]
pub struct HeadlessMedia {
    src: String,
    native_hls: bool,
}

impl HeadlessMedia {
    pub fn new(native_hls: bool) -> Self {
        Self {
            src: String::new(),
            native_hls,
        }
    }
}

impl MediaElement for HeadlessMedia {
    fn src(&self) -> String {
        self.src.clone()
    }

    fn set_src(&mut self, url: &str) {
        self.src = url.to_string();
    }

    fn can_play_type(&self, mime: &str) -> bool {
        self.native_hls && mime == HLS_MIME_TYPE
    }
}

#[derive(Default)]
struct ProbeState {
    player_events: Option<EngineEventSender>,
    streaming_events: Option<EngineEventSender>,
    players_created: usize,
    streaming_created: usize,
    streaming_destroyed: usize,
    start_load_calls: usize,
    media_recoveries: usize,
    loaded_urls: Vec<String>,
}

/// Shared view into what a [`HeadlessPlatform`] has built.
///
/// Lets a test observe engine lifecycles and raise engine callbacks after
/// the platform has been moved into a surface.
#[derive(Clone, Default)]
pub struct HeadlessProbe(Arc<Mutex<ProbeState>>);

impl HeadlessProbe {
    pub fn players_created(&self) -> usize {
        self.0.lock().players_created
    }

    pub fn streaming_created(&self) -> usize {
        self.0.lock().streaming_created
    }

    /// Streaming engines created and not yet destroyed.
    ///
    /// Only the built-in headless streaming engine reports destruction; engines
    /// from a custom factory always count as live.
    pub fn live_streaming_engines(&self) -> usize {
        let state = self.0.lock();
        state.streaming_created - state.streaming_destroyed
    }

    pub fn start_load_calls(&self) -> usize {
        self.0.lock().start_load_calls
    }

    pub fn media_recoveries(&self) -> usize {
        self.0.lock().media_recoveries
    }

    pub fn loaded_urls(&self) -> Vec<String> {
        self.0.lock().loaded_urls.clone()
    }

    /// Raise a callback from the most recent playback engine
    pub fn emit_playback(&self, event: PlaybackEvent) -> bool {
        match &self.0.lock().player_events {
            Some(events) => {
                events.playback(event);
                true
            }
            None => false,
        }
    }

    /// Raise a callback from the most recent streaming engine
    pub fn emit_streaming(&self, event: StreamingEvent) -> bool {
        match &self.0.lock().streaming_events {
            Some(events) => {
                events.streaming(event);
                true
            }
            None => false,
        }
    }
}

/// Playback engine holding its state in memory
pub struct HeadlessPlayer {
    events: EngineEventSender,
    current_time: f64,
    duration: f64,
    buffered: f64,
    volume: f64,
    muted: bool,
    speed: f64,
    playing: bool,
    stopped: bool,
    ended: bool,
    fullscreen: bool,
    captions: bool,
    pip: bool,
    controls_visible: bool,
    quality_options: Vec<u32>,
    selected_quality: u32,
    destroyed: bool,
}

impl HeadlessPlayer {
    /// Build a player and report it ready; starts playing when `autoplay`
    pub fn new(options: &PlayerOptions, duration: f64, events: EngineEventSender) -> Self {
        let mut player = Self {
            events,
            current_time: 0.0,
            duration,
            buffered: 0.0,
            volume: 1.0,
            muted: false,
            speed: options.speed,
            playing: false,
            stopped: true,
            ended: false,
            fullscreen: false,
            captions: false,
            pip: false,
            controls_visible: true,
            quality_options: options.quality_options.clone(),
            selected_quality: options.default_quality,
            destroyed: false,
        };

        player.emit(PlaybackEvent::Ready);
        player.emit(PlaybackEvent::CanPlay);
        if options.autoplay {
            player.play();
        }
        player
    }

    /// Quality entries currently offered in the menu
    pub fn quality_options(&self) -> &[u32] {
        &self.quality_options
    }

    pub fn selected_quality(&self) -> u32 {
        self.selected_quality
    }

    pub fn captions_visible(&self) -> bool {
        self.captions
    }

    pub fn pip_active(&self) -> bool {
        self.pip
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible
    }

    fn emit(&self, event: PlaybackEvent) {
        if !self.destroyed {
            self.events.playback(event);
        }
    }

    fn clamp_time(&self, seconds: f64) -> f64 {
        if self.duration > 0.0 {
            seconds.clamp(0.0, self.duration)
        } else {
            seconds.max(0.0)
        }
    }
}

impl PlaybackEngine for HeadlessPlayer {
    fn play(&mut self) {
        if self.playing {
            return;
        }
        self.playing = true;
        self.stopped = false;
        self.ended = false;
        self.emit(PlaybackEvent::Play);
    }

    fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.emit(PlaybackEvent::Pause);
    }

    fn toggle_play(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    fn stop(&mut self) {
        self.pause();
        self.set_current_time(0.0);
        self.stopped = true;
    }

    fn restart(&mut self) {
        self.set_current_time(0.0);
    }

    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn set_current_time(&mut self, seconds: f64) {
        let target = self.clamp_time(seconds);
        self.emit(PlaybackEvent::Seeking);
        self.current_time = target;
        self.ended = false;
        self.emit(PlaybackEvent::Seeked);
        self.emit(PlaybackEvent::TimeUpdate);
    }

    fn forward(&mut self, seconds: f64) {
        self.set_current_time(self.current_time + seconds);
    }

    fn rewind(&mut self, seconds: f64) {
        self.set_current_time(self.current_time - seconds);
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn buffered(&self) -> f64 {
        self.buffered
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_volume(&mut self, level: f64) {
        self.volume = level.clamp(0.0, 1.0);
        self.emit(PlaybackEvent::VolumeChange);
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.emit(PlaybackEvent::VolumeChange);
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn set_speed(&mut self, rate: f64) {
        self.speed = rate;
    }

    fn playing(&self) -> bool {
        self.playing
    }

    fn paused(&self) -> bool {
        !self.playing
    }

    fn stopped(&self) -> bool {
        self.stopped
    }

    fn ended(&self) -> bool {
        self.ended
    }

    fn seeking(&self) -> bool {
        false
    }

    fn fullscreen_active(&self) -> bool {
        self.fullscreen
    }

    fn enter_fullscreen(&mut self) {
        if !self.fullscreen {
            self.fullscreen = true;
            self.emit(PlaybackEvent::EnterFullscreen);
        }
    }

    fn exit_fullscreen(&mut self) {
        if self.fullscreen {
            self.fullscreen = false;
            self.emit(PlaybackEvent::ExitFullscreen);
        }
    }

    fn toggle_fullscreen(&mut self) {
        if self.fullscreen {
            self.exit_fullscreen();
        } else {
            self.enter_fullscreen();
        }
    }

    fn toggle_captions(&mut self, show: Option<bool>) {
        self.captions = show.unwrap_or(!self.captions);
    }

    fn pip_supported(&self) -> bool {
        true
    }

    fn set_pip(&mut self, active: bool) {
        self.pip = active;
    }

    fn toggle_controls(&mut self, show: bool) {
        self.controls_visible = show;
    }

    fn set_quality_options(&mut self, options: &[u32], selected: u32) {
        self.quality_options = options.to_vec();
        self.selected_quality = selected;
    }

    fn destroy(&mut self) {
        self.playing = false;
        self.destroyed = true;
    }
}

/// Streaming engine serving a fixed level ladder.
///
/// Reports the manifest as parsed as soon as a source is loaded.
pub struct HeadlessStreaming {
    events: EngineEventSender,
    probe: HeadlessProbe,
    levels: Vec<QualityLevel>,
    live: bool,
    url: Option<String>,
    current_level: i64,
    parsed: bool,
}

impl HeadlessStreaming {
    pub fn new(levels: Vec<QualityLevel>, live: bool, events: EngineEventSender, probe: HeadlessProbe) -> Self {
        Self {
            events,
            probe,
            levels,
            live,
            url: None,
            current_level: -1,
            parsed: false,
        }
    }
}

impl StreamingEngine for HeadlessStreaming {
    fn load_source(&mut self, url: &str) {
        self.url = Some(url.to_string());
        self.probe.0.lock().loaded_urls.push(url.to_string());
        self.parsed = true;
        self.events.streaming(StreamingEvent::ManifestParsed);
    }

    fn attach_media(&mut self, media: &mut dyn MediaElement) {
        if let Some(url) = &self.url {
            media.set_src(url);
        }
    }

    fn levels(&self) -> Vec<QualityLevel> {
        if self.parsed {
            self.levels.clone()
        } else {
            Vec::new()
        }
    }

    fn current_level(&self) -> i64 {
        self.current_level
    }

    fn set_current_level(&mut self, index: i64) {
        self.current_level = index;
    }

    fn is_live(&self) -> bool {
        self.parsed && self.live
    }

    fn start_load(&mut self) {
        self.probe.0.lock().start_load_calls += 1;
    }

    fn recover_media_error(&mut self) {
        self.probe.0.lock().media_recoveries += 1;
    }

    fn destroy(&mut self) {
        self.probe.0.lock().streaming_destroyed += 1;
    }
}

/// Environment built from headless parts
pub struct HeadlessPlatform {
    media: Option<HeadlessMedia>,
    streaming_supported: bool,
    levels: Vec<QualityLevel>,
    live: bool,
    duration: f64,
    streaming_factory: Option<StreamingFactory>,
    probe: HeadlessProbe,
}

impl HeadlessPlatform {
    /// Media element present, streaming supported, a 360/720/1080 ladder
    pub fn new() -> Self {
        Self {
            media: Some(HeadlessMedia::new(false)),
            streaming_supported: true,
            levels: default_ladder(),
            live: false,
            duration: 120.0,
            streaming_factory: None,
            probe: HeadlessProbe::default(),
        }
    }

    pub fn without_media_element(mut self) -> Self {
        self.media = None;
        self
    }

    pub fn with_streaming_support(mut self, supported: bool) -> Self {
        self.streaming_supported = supported;
        self
    }

    pub fn with_native_hls(mut self, native: bool) -> Self {
        if let Some(media) = &mut self.media {
            media.native_hls = native;
        }
        self
    }

    pub fn with_levels(mut self, levels: Vec<QualityLevel>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Duration the headless player reports, in seconds
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Use a different streaming engine (e.g. the HLS engine)
    pub fn with_streaming_factory(mut self, factory: StreamingFactory) -> Self {
        self.streaming_factory = Some(factory);
        self
    }

    pub fn probe(&self) -> HeadlessProbe {
        self.probe.clone()
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HeadlessPlatform {
    fn media_element(&mut self) -> Option<&mut dyn MediaElement> {
        self.media.as_mut().map(|m| m as &mut dyn MediaElement)
    }

    fn streaming_supported(&self) -> bool {
        self.streaming_supported
    }

    fn create_streaming_engine(
        &mut self,
        config: &StreamingConfig,
        events: EngineEventSender,
    ) -> Box<dyn StreamingEngine> {
        debug!(generation = events.generation(), ?config, "Creating streaming engine");
        {
            let mut state = self.probe.0.lock();
            state.streaming_created += 1;
            state.streaming_events = Some(events.clone());
        }

        match &mut self.streaming_factory {
            Some(factory) => factory(config, events),
            None => Box::new(HeadlessStreaming::new(
                self.levels.clone(),
                self.live,
                events,
                self.probe.clone(),
            )),
        }
    }

    fn create_player(
        &mut self,
        options: &PlayerOptions,
        events: EngineEventSender,
    ) -> Box<dyn PlaybackEngine> {
        debug!(generation = events.generation(), autoplay = options.autoplay, "Creating player");
        {
            let mut state = self.probe.0.lock();
            state.players_created += 1;
            state.player_events = Some(events.clone());
        }

        Box::new(HeadlessPlayer::new(options, self.duration, events))
    }
}

/// 360p / 720p / 1080p ladder
pub fn default_ladder() -> Vec<QualityLevel> {
    vec![
        QualityLevel { index: 0, height: 360, width: 640, bitrate: 800_000 },
        QualityLevel { index: 1, height: 720, width: 1280, bitrate: 2_800_000 },
        QualityLevel { index: 2, height: 1080, width: 1920, bitrate: 5_000_000 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineEvent, TaggedEngineEvent};
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TaggedEngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            events.push(tagged.event);
        }
        events
    }

    #[test]
    fn test_player_ready_then_autoplay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = PlayerOptions { autoplay: true, ..Default::default() };
        let player = HeadlessPlayer::new(&options, 60.0, EngineEventSender::new(1, tx));

        assert!(player.playing());
        assert_eq!(
            drain(&mut rx),
            vec![
                EngineEvent::Playback(PlaybackEvent::Ready),
                EngineEvent::Playback(PlaybackEvent::CanPlay),
                EngineEvent::Playback(PlaybackEvent::Play),
            ]
        );
    }

    #[test]
    fn test_player_seek_clamps_to_duration() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut player = HeadlessPlayer::new(&PlayerOptions::default(), 60.0, EngineEventSender::new(1, tx));

        player.forward(90.0);
        assert_eq!(player.current_time(), 60.0);
        player.rewind(100.0);
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_destroyed_player_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut player = HeadlessPlayer::new(&PlayerOptions::default(), 60.0, EngineEventSender::new(1, tx));
        drain(&mut rx);

        player.destroy();
        player.play();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_streaming_reports_levels_after_load() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = HeadlessProbe::default();
        let mut engine = HeadlessStreaming::new(default_ladder(), true, EngineEventSender::new(2, tx), probe.clone());

        assert!(engine.levels().is_empty());
        engine.load_source("stream.m3u8");
        assert_eq!(engine.levels().len(), 3);
        assert!(engine.is_live());
        assert_eq!(drain(&mut rx), vec![EngineEvent::Streaming(StreamingEvent::ManifestParsed)]);
        assert_eq!(probe.loaded_urls(), vec!["stream.m3u8".to_string()]);
    }

    #[test]
    fn test_native_hls_probe() {
        let media = HeadlessMedia::new(true);
        assert!(media.can_play_type(HLS_MIME_TYPE));
        assert!(!HeadlessMedia::new(false).can_play_type(HLS_MIME_TYPE));
    }
}
