//! Player Session - engines and flags owned by one command surface
//!
//! Holds:
//! - the attached playback and streaming engine instances
//! - ready / live flags and the current quality
//! - the source loading state
//! - recovery attempt counters for the current source
//!
//! Created with the surface, emptied on `destroy`, never shared.

use crate::engine::{PlaybackEngine, StreamingEngine};
use crate::types::{LoadState, SessionId};
use tracing::{debug, info};

/// Per-surface session state
pub struct PlayerSession {
    id: SessionId,
    /// Attached playback engine
    pub player: Option<Box<dyn PlaybackEngine>>,
    /// Attached streaming engine (HLS sources only)
    pub streaming: Option<Box<dyn StreamingEngine>>,
    /// Generation of the attached playback engine
    pub player_generation: u64,
    /// Generation of the attached streaming engine
    pub streaming_generation: u64,
    /// Set once the playback engine reported ready
    pub ready: bool,
    /// Set from the parsed manifest
    pub live: bool,
    /// Current quality (height); 0 or negative means automatic
    pub quality: i64,
    /// Autoplay requested by the last `loadSource`
    pub autoplay: bool,
    /// Fatal network errors recovered since the last `loadSource`
    pub network_retries: u32,
    /// Fatal media errors recovered since the last `loadSource`
    pub media_recoveries: u32,
    load_state: LoadState,
    next_generation: u64,
}

impl PlayerSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            player: None,
            streaming: None,
            player_generation: 0,
            streaming_generation: 0,
            ready: false,
            live: false,
            quality: 0,
            autoplay: false,
            network_retries: 0,
            media_recoveries: 0,
            load_state: LoadState::Idle,
            next_generation: 1,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn set_load_state(&mut self, state: LoadState) {
        if self.load_state != state {
            info!(session_id = %self.id, from = %self.load_state, to = %state, "Load state transition");
            self.load_state = state;
        }
    }

    /// Allocate a generation for a new engine instance
    pub fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Reset per-source counters ahead of a new load
    pub fn begin_load(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
        self.network_retries = 0;
        self.media_recoveries = 0;
    }

    /// Tear down the streaming engine, if any. Safe to call repeatedly.
    pub fn detach_streaming(&mut self) {
        if let Some(mut streaming) = self.streaming.take() {
            debug!(session_id = %self.id, generation = self.streaming_generation, "Destroying streaming engine");
            streaming.destroy();
        }
        self.streaming_generation = 0;
    }

    /// Tear down the playback engine, if any. Safe to call repeatedly.
    pub fn detach_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            debug!(session_id = %self.id, generation = self.player_generation, "Destroying player");
            player.destroy();
        }
        self.player_generation = 0;
    }

    /// Drop both engines and return to idle
    pub fn destroy(&mut self) {
        self.detach_streaming();
        self.detach_player();
        self.ready = false;
        self.live = false;
        self.quality = 0;
        self.set_load_state(LoadState::Idle);
    }

    /// Whether `generation` is the attached playback engine
    pub fn is_current_player(&self, generation: u64) -> bool {
        generation != 0 && generation == self.player_generation
    }

    /// Whether `generation` is the attached streaming engine
    pub fn is_current_streaming(&self, generation: u64) -> bool {
        generation != 0 && generation == self.streaming_generation
    }
}

impl Default for PlayerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = PlayerSession::new();
        assert_eq!(session.load_state(), LoadState::Idle);
        assert!(!session.ready);
        assert_eq!(session.quality, 0);
        assert!(session.player.is_none());
    }

    #[test]
    fn test_generations_are_unique() {
        let mut session = PlayerSession::new();
        let a = session.next_generation();
        let b = session.next_generation();
        assert_ne!(a, b);
        assert!(!session.is_current_player(a));

        session.player_generation = b;
        assert!(session.is_current_player(b));
        assert!(!session.is_current_streaming(b));
        assert!(!session.is_current_player(0));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut session = PlayerSession::new();
        session.ready = true;
        session.set_load_state(LoadState::Ready);

        session.destroy();
        session.destroy();
        assert!(!session.ready);
        assert_eq!(session.load_state(), LoadState::Idle);
    }
}
