//! Cross-context message channel
//!
//! Models the browser's frame messaging: every browsing context is a window
//! with an origin and an inbox. A message is posted *to* a window together
//! with a target origin; it is only delivered when the receiving window's
//! origin matches. Each delivered [`Envelope`] carries the sender's origin
//! and a handle to reply on.

use crate::events::EventSink;
use crate::protocol::EventMessage;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving end of a window
pub type Inbox = mpsc::UnboundedReceiver<Envelope>;

/// Origin filter for outgoing and incoming messages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetOrigin {
    /// "*": any origin
    Any,
    /// A single origin, e.g. "https://player.example.com"
    Exact(String),
}

impl TargetOrigin {
    pub fn parse(origin: &str) -> Self {
        match origin.trim() {
            "*" | "" => TargetOrigin::Any,
            exact => TargetOrigin::Exact(exact.trim_end_matches('/').to_string()),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            TargetOrigin::Any => true,
            TargetOrigin::Exact(expected) => expected == origin.trim_end_matches('/'),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TargetOrigin::Any)
    }
}

impl From<&str> for TargetOrigin {
    fn from(origin: &str) -> Self {
        TargetOrigin::parse(origin)
    }
}

impl std::fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOrigin::Any => write!(f, "*"),
            TargetOrigin::Exact(origin) => write!(f, "{}", origin),
        }
    }
}

/// A delivered message
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Origin of the sending window
    pub origin: String,
    /// The sending window, for replies
    pub source: Option<WindowHandle>,
    pub data: Value,
}

/// Sending half of a window; cheap to clone
#[derive(Debug, Clone)]
pub struct WindowHandle {
    origin: Arc<str>,
    inbox: mpsc::UnboundedSender<Envelope>,
}

/// Create a window for `origin`
pub fn window(origin: &str) -> (WindowHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = WindowHandle {
        origin: Arc::from(origin.trim_end_matches('/')),
        inbox: tx,
    };
    (handle, rx)
}

impl WindowHandle {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Post `data` to this window on behalf of `sender`.
    ///
    /// A message whose target origin does not match this window is dropped
    /// without error, like the browser does.
    pub fn post_message(&self, data: Value, target_origin: &TargetOrigin, sender: &WindowHandle) -> Result<()> {
        if !target_origin.matches(&self.origin) {
            debug!(
                target = %target_origin,
                actual = %self.origin,
                "Dropping message for mismatched target origin"
            );
            return Ok(());
        }

        self.inbox
            .send(Envelope {
                origin: sender.origin.to_string(),
                source: Some(sender.clone()),
                data,
            })
            .map_err(|_| Error::TransportClosed)
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

/// Frames embedded in a host page, by element id
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    frames: Arc<RwLock<HashMap<String, WindowHandle>>>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed a frame under `id`, replacing any previous one
    pub fn insert(&self, id: impl Into<String>, frame: WindowHandle) {
        self.frames.write().insert(id.into(), frame);
    }

    pub fn get(&self, id: &str) -> Option<WindowHandle> {
        self.frames.read().get(id).cloned()
    }

    /// Like [`get`](Self::get), failing with [`Error::EndpointNotFound`]
    pub fn lookup(&self, id: &str) -> Result<WindowHandle> {
        self.get(id).ok_or_else(|| Error::EndpointNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<WindowHandle> {
        self.frames.write().remove(id)
    }
}

/// Event sink posting events to a parent window
pub struct FrameSink {
    parent: WindowHandle,
    own: WindowHandle,
    target_origin: TargetOrigin,
}

impl FrameSink {
    pub fn new(parent: WindowHandle, own: WindowHandle, target_origin: TargetOrigin) -> Self {
        Self {
            parent,
            own,
            target_origin,
        }
    }
}

impl EventSink for FrameSink {
    fn deliver(&mut self, message: &EventMessage) {
        let data = serde_json::to_value(message).unwrap_or(Value::Null);
        if let Err(e) = self.parent.post_message(data, &self.target_origin, &self.own) {
            debug!(error = %e, event = %message.event, "Parent window gone, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_origin_matching() {
        let any = TargetOrigin::parse("*");
        assert!(any.is_wildcard());
        assert!(any.matches("https://evil.test"));

        let exact = TargetOrigin::parse("https://player.test/");
        assert!(exact.matches("https://player.test"));
        assert!(!exact.matches("https://player.test:8443"));
        assert!(!exact.matches("http://player.test"));
        assert_eq!(exact.to_string(), "https://player.test");
    }

    #[test]
    fn test_post_stamps_sender_origin() {
        let (host, _host_inbox) = window("https://host.test");
        let (frame, mut frame_inbox) = window("https://player.test");

        frame
            .post_message(json!({"action": "play"}), &TargetOrigin::parse("https://player.test"), &host)
            .unwrap();

        let envelope = frame_inbox.try_recv().unwrap();
        assert_eq!(envelope.origin, "https://host.test");
        assert_eq!(envelope.source.unwrap().origin(), "https://host.test");
        assert_eq!(envelope.data["action"], "play");
    }

    #[test]
    fn test_post_to_wrong_origin_is_dropped() {
        let (host, _host_inbox) = window("https://host.test");
        let (frame, mut frame_inbox) = window("https://player.test");

        frame
            .post_message(json!({"action": "play"}), &TargetOrigin::parse("https://other.test"), &host)
            .unwrap();
        assert!(frame_inbox.try_recv().is_err());
    }

    #[test]
    fn test_post_to_closed_window_fails() {
        let (host, _host_inbox) = window("https://host.test");
        let (frame, frame_inbox) = window("https://player.test");
        drop(frame_inbox);

        assert!(frame.is_closed());
        let err = frame.post_message(json!({}), &TargetOrigin::Any, &host).unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_CLOSED");
    }

    #[test]
    fn test_frame_registry() {
        let registry = FrameRegistry::new();
        let (frame, _inbox) = window("https://player.test");
        registry.insert("player-frame", frame);

        assert!(registry.get("player-frame").is_some());
        assert!(registry.get("missing").is_none());
        let err = tokio_test::assert_err!(registry.lookup("missing"));
        assert_eq!(err.error_code(), "ENDPOINT_NOT_FOUND");
        tokio_test::assert_ok!(registry.lookup("player-frame"));
        assert!(registry.remove("player-frame").is_some());
        assert!(registry.get("player-frame").is_none());
    }
}
