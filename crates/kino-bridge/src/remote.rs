//! Remote Controller - drives a player in another window
//!
//! Every command becomes a `{action, args, requestId}` message posted to the
//! player frame. The returned future resolves when a response with the same
//! id comes back, or fails with [`Error::Timeout`] once the deadline passes.
//! Events posted by the frame are dispatched to subscribers by exact name and
//! to wildcard (`*`) subscribers.
//!
//! Must be created inside a tokio runtime; a listener task drains the host
//! window's inbox for as long as any clone of the controller is alive.

use crate::events::EventKind;
use crate::protocol::{CommandRequest, CommandResponse, RequestId, TransportMessage};
use crate::transport::{Envelope, FrameRegistry, Inbox, TargetOrigin, WindowHandle};
use crate::types::{BridgeConfig, PlayerStateSnapshot, QualityInfo};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Subscription name receiving every event
pub const WILDCARD: &str = "*";

/// Handle for removing a single subscription
pub type ListenerId = u64;

#[derive(Clone)]
enum Listener {
    Payload(Arc<dyn Fn(&Value) + Send + Sync>),
    Named(Arc<dyn Fn(&str, &Value) + Send + Sync>),
}

struct PendingRequest {
    reply: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
}

struct Inner {
    config: BridgeConfig,
    target: TargetOrigin,
    frame: Option<WindowHandle>,
    host: WindowHandle,
    next_request: AtomicU64,
    next_listener: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    inbox_task: AbortHandle,
}

/// Client side of the bridge; cheap to clone
#[derive(Clone)]
pub struct RemoteController {
    inner: Arc<Inner>,
}

impl RemoteController {
    /// Bind to the frame registered as `frame_id`.
    ///
    /// A missing frame does not fail: the controller is inert and every
    /// call runs into its deadline.
    pub fn connect(
        frames: &FrameRegistry,
        frame_id: &str,
        host: WindowHandle,
        inbox: Inbox,
        config: BridgeConfig,
    ) -> Self {
        let frame = match frames.lookup(frame_id) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "Controller is inert");
                None
            }
        };
        Self::new(frame, host, inbox, config)
    }

    /// Bind directly to a frame window
    pub fn new(frame: Option<WindowHandle>, host: WindowHandle, inbox: Inbox, config: BridgeConfig) -> Self {
        let target = TargetOrigin::parse(&config.target_origin);
        info!(
            target = %target,
            connected = frame.is_some(),
            timeout_ms = config.request_timeout_ms,
            "Remote controller created"
        );

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            config,
            target,
            frame,
            host,
            next_request: AtomicU64::new(0),
            next_listener: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            inbox_task: tokio::spawn(listen(weak.clone(), inbox)).abort_handle(),
        });

        Self { inner }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.frame.is_some()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Process one message delivered to the host window
    pub fn handle_message(&self, envelope: Envelope) {
        self.inner.handle_message(envelope);
    }

    // ========================================================================
    // RPC
    // ========================================================================

    /// Send a command and wait for its result
    pub async fn call(&self, action: &str, args: Vec<Value>) -> Result<Value> {
        let reply = self.inner.dispatch(action, args);
        reply.await.unwrap_or(Err(Error::TransportClosed))
    }

    async fn call_as<T: DeserializeOwned>(&self, action: &str, args: Vec<Value>) -> Result<T> {
        let value = self.call(action, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_unit(&self, action: &str, args: Vec<Value>) -> Result<()> {
        self.call(action, args).await.map(|_| ())
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to an event by its exact name ("onPlay").
    ///
    /// `*` subscribers need the event name; register them with
    /// [`on_any`](Self::on_any).
    pub fn on(&self, event: &str, callback: impl Fn(&Value) + Send + Sync + 'static) -> Result<ListenerId> {
        if event == WILDCARD {
            return Err(Error::InvalidArgument {
                action: "on".to_string(),
                reason: "wildcard listeners receive the event name, use on_any".to_string(),
            });
        }
        Ok(self.inner.subscribe(event, Listener::Payload(Arc::new(callback))))
    }

    /// Subscribe to a surface event kind
    pub fn on_event(&self, kind: EventKind, callback: impl Fn(&Value) + Send + Sync + 'static) -> ListenerId {
        self.inner.subscribe(kind.as_str(), Listener::Payload(Arc::new(callback)))
    }

    /// Subscribe to every event, receiving its name and payload
    pub fn on_any(&self, callback: impl Fn(&str, &Value) + Send + Sync + 'static) -> ListenerId {
        self.inner.subscribe(WILDCARD, Listener::Named(Arc::new(callback)))
    }

    /// Remove one subscription, or all subscriptions for `event` when `id`
    /// is `None`. Removing something already gone is a no-op.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        let mut listeners = self.inner.listeners.lock();
        match id {
            None => {
                listeners.remove(event);
            }
            Some(id) => {
                if let Some(entries) = listeners.get_mut(event) {
                    entries.retain(|(existing, _)| *existing != id);
                    if entries.is_empty() {
                        listeners.remove(event);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn play(&self) -> Result<()> {
        self.call_unit("play", vec![]).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.call_unit("pause", vec![]).await
    }

    pub async fn toggle_play(&self) -> Result<()> {
        self.call_unit("togglePlay", vec![]).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.call_unit("stop", vec![]).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.call_unit("restart", vec![]).await
    }

    pub async fn seek(&self, seconds: f64) -> Result<()> {
        self.call_unit("seek", vec![json!(seconds)]).await
    }

    pub async fn forward(&self, seconds: f64) -> Result<()> {
        self.call_unit("forward", vec![json!(seconds)]).await
    }

    pub async fn rewind(&self, seconds: f64) -> Result<()> {
        self.call_unit("rewind", vec![json!(seconds)]).await
    }

    pub async fn set_volume(&self, level: f64) -> Result<()> {
        self.call_unit("setVolume", vec![json!(level)]).await
    }

    pub async fn get_volume(&self) -> Result<f64> {
        self.call_as("getVolume", vec![]).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.call_unit("setMuted", vec![json!(muted)]).await
    }

    pub async fn is_muted(&self) -> Result<bool> {
        self.call_as("isMuted", vec![]).await
    }

    pub async fn set_speed(&self, rate: f64) -> Result<()> {
        self.call_unit("setSpeed", vec![json!(rate)]).await
    }

    pub async fn get_speed(&self) -> Result<f64> {
        self.call_as("getSpeed", vec![]).await
    }

    pub async fn set_quality(&self, quality: i64) -> Result<()> {
        self.call_unit("setQuality", vec![json!(quality)]).await
    }

    pub async fn get_quality(&self) -> Result<i64> {
        self.call_as("getQuality", vec![]).await
    }

    pub async fn get_qualities(&self) -> Result<Vec<QualityInfo>> {
        self.call_as("getQualities", vec![]).await
    }

    pub async fn enter_fullscreen(&self) -> Result<()> {
        self.call_unit("enterFullscreen", vec![]).await
    }

    pub async fn exit_fullscreen(&self) -> Result<()> {
        self.call_unit("exitFullscreen", vec![]).await
    }

    pub async fn toggle_fullscreen(&self) -> Result<()> {
        self.call_unit("toggleFullscreen", vec![]).await
    }

    pub async fn is_fullscreen(&self) -> Result<bool> {
        self.call_as("isFullscreen", vec![]).await
    }

    pub async fn load_source(&self, url: &str, autoplay: bool) -> Result<()> {
        self.call_unit("loadSource", vec![json!(url), json!(autoplay)]).await
    }

    pub async fn get_source(&self) -> Result<String> {
        self.call_as("getSource", vec![]).await
    }

    pub async fn get_state(&self) -> Result<PlayerStateSnapshot> {
        self.call_as("getState", vec![]).await
    }

    pub async fn get_current_time(&self) -> Result<f64> {
        self.call_as("getCurrentTime", vec![]).await
    }

    pub async fn get_duration(&self) -> Result<f64> {
        self.call_as("getDuration", vec![]).await
    }

    pub async fn get_buffered(&self) -> Result<f64> {
        self.call_as("getBuffered", vec![]).await
    }

    pub async fn is_playing(&self) -> Result<bool> {
        self.call_as("isPlaying", vec![]).await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.call_as("isPaused", vec![]).await
    }

    pub async fn is_live(&self) -> Result<bool> {
        self.call_as("isLive", vec![]).await
    }

    pub async fn is_ready(&self) -> Result<bool> {
        self.call_as("isReady", vec![]).await
    }

    /// Show or hide captions; `None` toggles
    pub async fn toggle_captions(&self, show: Option<bool>) -> Result<()> {
        let args = show.map(|s| vec![json!(s)]).unwrap_or_default();
        self.call_unit("toggleCaptions", args).await
    }

    pub async fn enter_pip(&self) -> Result<()> {
        self.call_unit("enterPiP", vec![]).await
    }

    pub async fn exit_pip(&self) -> Result<()> {
        self.call_unit("exitPiP", vec![]).await
    }

    pub async fn show_controls(&self) -> Result<()> {
        self.call_unit("showControls", vec![]).await
    }

    pub async fn hide_controls(&self) -> Result<()> {
        self.call_unit("hideControls", vec![]).await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.call_unit("destroy", vec![]).await
    }

    pub async fn get_version(&self) -> Result<String> {
        self.call_as("getVersion", vec![]).await
    }
}

impl Inner {
    fn dispatch(self: &Arc<Self>, action: &str, args: Vec<Value>) -> oneshot::Receiver<Result<Value>> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply, receiver) = oneshot::channel();

        let deadline = Duration::from_millis(self.config.request_timeout_ms);
        let weak = Arc::downgrade(self);

        // Registered under the lock so the timer cannot expire the entry
        // before it exists
        {
            let mut pending = self.pending.lock();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(request_id);
                }
            })
            .abort_handle();
            pending.insert(request_id, PendingRequest { reply, timer });
        }
        debug!(request_id, action, "Sending request");

        let Some(frame) = &self.frame else {
            return receiver;
        };

        let message = TransportMessage::from(CommandRequest::new(action, args, request_id)).to_value();
        if let Err(e) = frame.post_message(message, &self.target, &self.host) {
            warn!(request_id, error = %e, "Player frame is gone");
            self.settle(request_id, Err(e));
        }

        receiver
    }

    fn expire(&self, request_id: RequestId) {
        if let Some(pending) = self.pending.lock().remove(&request_id) {
            warn!(request_id, "Request timed out");
            let _ = pending.reply.send(Err(Error::Timeout));
        }
    }

    /// Complete a pending request; a no-op once it has been removed
    fn settle(&self, request_id: RequestId, outcome: Result<Value>) -> bool {
        let Some(pending) = self.pending.lock().remove(&request_id) else {
            return false;
        };
        pending.timer.abort();
        // The caller may have stopped waiting
        let _ = pending.reply.send(outcome);
        true
    }

    fn resolve(&self, response: CommandResponse) {
        let request_id = response.request_id;
        let outcome = match response.failure() {
            Some(message) => Err(Error::remote(message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        if self.settle(request_id, outcome) {
            debug!(request_id, "Request resolved");
        } else {
            debug!(request_id, "Discarding response without pending request");
        }
    }

    fn handle_message(&self, envelope: Envelope) {
        if !self.target.matches(&envelope.origin) {
            warn!(origin = %envelope.origin, expected = %self.target, "Ignoring message from foreign origin");
            return;
        }

        match TransportMessage::decode(&envelope.data, &self.config.protocol_tag) {
            Some(TransportMessage::Response(response)) => self.resolve(response),
            Some(TransportMessage::Event(event)) => self.dispatch_event(&event.event, &event.data),
            Some(TransportMessage::Request(_)) | None => {
                debug!(origin = %envelope.origin, "Ignoring unrelated message");
            }
        }
    }

    fn subscribe(&self, event: &str, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn dispatch_event(&self, name: &str, data: &Value) {
        // Collected first so callbacks may subscribe or unsubscribe
        let (named, wildcard) = {
            let listeners = self.listeners.lock();
            let collect = |key: &str| -> Vec<Listener> {
                listeners
                    .get(key)
                    .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                    .unwrap_or_default()
            };
            let named = if name == WILDCARD { Vec::new() } else { collect(name) };
            (named, collect(WILDCARD))
        };

        debug!(event = name, listeners = named.len() + wildcard.len(), "Dispatching event");

        for listener in named.iter().chain(wildcard.iter()) {
            match listener {
                Listener::Payload(callback) => callback(data),
                Listener::Named(callback) => callback(name, data),
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.inbox_task.abort();
        for (_, pending) in self.pending.get_mut().drain() {
            pending.timer.abort();
        }
    }
}

async fn listen(inner: Weak<Inner>, mut inbox: Inbox) {
    while let Some(envelope) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_message(envelope);
    }
}
