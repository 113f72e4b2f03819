//! Kino Bridge - Player control bridge for Kino
//!
//! This crate lets a host drive an embedded player:
//! - a command surface running next to the playback engine
//! - a remote controller issuing correlated requests from another window
//! - a normalized event stream flowing back over the same channel
//! - origin filtering on both ends
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────┐               ┌────────────────────────────┐
//! │        Host window         │               │        Player frame        │
//! │                            │   request     │                            │
//! │  ┌──────────────────────┐  │ ────────────► │  ┌──────────────────────┐  │
//! │  │  Remote Controller   │  │   response    │  │   Command Surface    │  │
//! │  │  (pending requests,  │  │ ◄──────────── │  │   (player session)   │  │
//! │  │   subscriptions)     │  │    events     │  └──────────┬───────────┘  │
//! │  └──────────────────────┘  │ ◄──────────── │             │              │
//! │                            │               │  ┌──────────┴───────────┐  │
//! └────────────────────────────┘               │  │ Playback / Streaming │  │
//!                                              │  │       engines        │  │
//!                                              │  └──────────────────────┘  │
//!                                              └────────────────────────────┘
//! ```

pub mod command;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod surface;
pub mod transport;
pub mod types;

pub use command::Command;
pub use engine::headless::{HeadlessPlatform, HeadlessProbe};
#[cfg(feature = "hls")]
pub use engine::hls::{HlsEngine, HttpManifestSource, ManifestSource};
pub use engine::{PlaybackEngine, Platform, StreamingEngine};
pub use error::{Error, Result};
pub use events::{EventKind, HostBridge, PlayerEvent};
pub use protocol::{CommandRequest, CommandResponse, EventMessage, TransportMessage};
pub use remote::{ListenerId, RemoteController};
pub use session::PlayerSession;
pub use surface::CommandSurface;
pub use transport::{window, Envelope, FrameRegistry, Inbox, TargetOrigin, WindowHandle};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version once at startup
pub fn init() {
    tracing::info!(version = VERSION, "Kino Bridge initialized");
}
