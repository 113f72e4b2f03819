//! Integration tests for Kino Bridge

use kino_bridge::engine::headless::HeadlessPlatform;
use kino_bridge::{
    window, BridgeConfig, CommandSurface, Envelope, Error, EventKind, FrameRegistry, LoadState,
    PlayerStateSnapshot, RecoveryPolicy, RemoteController, SurfaceConfig, TransportMessage,
    WindowHandle, VERSION,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const HOST: &str = "https://host.test";
const PLAYER: &str = "https://player.test";

// =============================================================================
// Harness
// =============================================================================

struct Bridge {
    remote: RemoteController,
    frame: WindowHandle,
    surface: JoinHandle<CommandSurface<HeadlessPlatform>>,
    events: mpsc::UnboundedReceiver<(String, Value)>,
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.surface.abort();
    }
}

/// Surface in the player frame, remote controller in the host window
fn bridge(platform: HeadlessPlatform) -> Bridge {
    bridge_with(platform, RecoveryPolicy::default())
}

fn bridge_with(platform: HeadlessPlatform, recovery: RecoveryPolicy) -> Bridge {
    let (host, host_inbox) = window(HOST);
    let (frame, frame_inbox) = window(PLAYER);

    let frames = FrameRegistry::new();
    frames.insert("player", frame.clone());

    let config = SurfaceConfig {
        allowed_origin: HOST.to_string(),
        event_target_origin: HOST.to_string(),
        recovery,
        ..Default::default()
    };
    let mut surface = CommandSurface::new(platform, config);
    surface.attach_parent(host.clone(), frame.clone());
    let surface = tokio::spawn(surface.run(frame.clone(), frame_inbox));

    let remote = RemoteController::connect(&frames, "player", host, host_inbox, BridgeConfig::for_origin(PLAYER));

    let (tx, events) = mpsc::unbounded_channel();
    remote.on_any(move |name, data| {
        let _ = tx.send((name.to_string(), data.clone()));
    });

    Bridge {
        remote,
        frame,
        surface,
        events,
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<(String, Value)>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok((name, _)) = events.try_recv() {
        names.push(name);
    }
    names
}

async fn wait_for(events: &mut mpsc::UnboundedReceiver<(String, Value)>, name: &str) -> Value {
    let wait = async {
        loop {
            let (event, data) = events.recv().await.expect("event stream closed");
            if event == name {
                return data;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or_else(|_| panic!("no {} event", name))
}

// =============================================================================
// Remote <-> Surface
// =============================================================================

#[tokio::test]
async fn test_state_defaults_without_engine() {
    let b = bridge(HeadlessPlatform::new());

    let state = b.remote.get_state().await.unwrap();
    assert_eq!(state, PlayerStateSnapshot::default());
    assert_eq!(b.remote.get_duration().await.unwrap(), 0.0);
    assert!(!b.remote.is_muted().await.unwrap());
    assert_eq!(b.remote.get_speed().await.unwrap(), 1.0);

    // Commands with no engine are accepted and do nothing
    b.remote.play().await.unwrap();
    b.remote.seek(10.0).await.unwrap();
    assert!(!b.remote.is_playing().await.unwrap());
}

#[tokio::test]
async fn test_hls_load_autoplays() {
    let mut b = bridge(HeadlessPlatform::new());

    b.remote.load_source("stream.m3u8", true).await.unwrap();

    // Events are posted before the response, on the same channel
    assert_eq!(
        drain(&mut b.events),
        vec!["onManifestParsed", "onReady", "onCanPlay", "onPlay"]
    );

    let state = b.remote.get_state().await.unwrap();
    assert!(state.is_ready);
    assert!(state.is_playing);
    assert_eq!(state.duration, 120.0);
    assert_eq!(state.quality, 0);

    let qualities = b.remote.get_qualities().await.unwrap();
    let labels: Vec<_> = qualities.iter().map(|q| q.label.as_str()).collect();
    assert_eq!(labels, vec!["360p", "720p", "1080p"]);
    assert_eq!(b.remote.get_quality().await.unwrap(), 0);
}

#[tokio::test]
async fn test_manifest_parsed_payload() {
    let mut b = bridge(HeadlessPlatform::new().with_live(true));
    b.remote.load_source("https://cdn.test/live.m3u8", false).await.unwrap();

    let data = wait_for(&mut b.events, "onManifestParsed").await;
    assert_eq!(data["isLive"], json!(true));
    assert_eq!(data["qualities"].as_array().unwrap().len(), 3);
    assert!(b.remote.is_live().await.unwrap());
    assert!(!b.remote.is_playing().await.unwrap());
}

#[tokio::test]
async fn test_volume_clamping_over_the_wire() {
    let mut b = bridge(HeadlessPlatform::new());
    b.remote.load_source("clip.mp4", false).await.unwrap();

    b.remote.set_volume(-0.5).await.unwrap();
    assert_eq!(b.remote.get_volume().await.unwrap(), 0.0);

    b.remote.set_volume(1.7).await.unwrap();
    assert_eq!(b.remote.get_volume().await.unwrap(), 1.0);

    b.remote.call("setVolume", vec![json!("0.3")]).await.unwrap();
    assert_eq!(b.remote.get_volume().await.unwrap(), 0.3);

    let data = wait_for(&mut b.events, "onVolumeChange").await;
    assert_eq!(data, json!({"volume": 0.0, "muted": false}));
}

#[tokio::test]
async fn test_playback_commands() {
    let mut b = bridge(HeadlessPlatform::new());
    b.remote.load_source("clip.mp4", false).await.unwrap();
    drain(&mut b.events);

    b.remote.play().await.unwrap();
    b.remote.seek(30.0).await.unwrap();
    b.remote.forward(15.0).await.unwrap();
    b.remote.rewind(5.0).await.unwrap();
    assert_eq!(b.remote.get_current_time().await.unwrap(), 40.0);

    let data = wait_for(&mut b.events, "onTimeUpdate").await;
    assert_eq!(data["percentage"], json!(25.0));

    b.remote.toggle_fullscreen().await.unwrap();
    assert!(b.remote.is_fullscreen().await.unwrap());
    let data = wait_for(&mut b.events, "onFullscreenChange").await;
    assert_eq!(data, json!({"isFullscreen": true}));

    b.remote.set_speed(1.5).await.unwrap();
    assert_eq!(b.remote.get_speed().await.unwrap(), 1.5);

    b.remote.stop().await.unwrap();
    assert_eq!(b.remote.get_current_time().await.unwrap(), 0.0);
    assert!(b.remote.is_paused().await.unwrap());

    assert_eq!(b.remote.get_source().await.unwrap(), "clip.mp4");
    assert_eq!(b.remote.get_version().await.unwrap(), VERSION);
}

#[tokio::test]
async fn test_unknown_action_rejected() {
    let b = bridge(HeadlessPlatform::new());

    let err = b.remote.call("selfDestruct", vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(err.to_string(), "Unknown action: selfDestruct");
}

#[tokio::test]
async fn test_reload_keeps_single_streaming_engine() {
    let platform = HeadlessPlatform::new();
    let probe = platform.probe();
    let b = bridge(platform);

    b.remote.load_source("first.m3u8", false).await.unwrap();
    b.remote.load_source("second.m3u8", false).await.unwrap();

    assert_eq!(probe.streaming_created(), 2);
    assert_eq!(probe.live_streaming_engines(), 1);
    assert_eq!(probe.loaded_urls(), vec!["first.m3u8", "second.m3u8"]);
    assert_eq!(b.remote.get_source().await.unwrap(), "second.m3u8");
}

#[tokio::test]
async fn test_destroy_over_the_wire() {
    let platform = HeadlessPlatform::new();
    let probe = platform.probe();
    let b = bridge(platform);

    b.remote.load_source("stream.m3u8", true).await.unwrap();
    b.remote.destroy().await.unwrap();

    assert_eq!(probe.live_streaming_engines(), 0);
    assert!(!b.remote.is_ready().await.unwrap());
    assert_eq!(b.remote.get_state().await.unwrap(), PlayerStateSnapshot::default());
}

#[tokio::test]
async fn test_subscription_by_kind() {
    let b = bridge(HeadlessPlatform::new());
    let pauses = Arc::new(Mutex::new(Vec::new()));

    let seen = pauses.clone();
    b.remote.on_event(EventKind::Pause, move |data| seen.lock().push(data.clone()));

    b.remote.load_source("clip.mp4", true).await.unwrap();
    b.remote.seek(12.0).await.unwrap();
    b.remote.pause().await.unwrap();

    assert_eq!(*pauses.lock(), vec![json!({"currentTime": 12.0})]);
}

// =============================================================================
// Origins and timeouts
// =============================================================================

#[tokio::test]
async fn test_surface_ignores_foreign_origin() {
    let b = bridge(HeadlessPlatform::new());
    let (evil, mut evil_inbox) = window("https://evil.test");

    let request = json!({"action": "getVersion", "args": [], "requestId": 1});
    b.frame
        .post_message(request, &kino_bridge::TargetOrigin::Any, &evil)
        .unwrap();

    // A legitimate round trip proves the forged request was processed first
    b.remote.get_version().await.unwrap();
    assert!(evil_inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_surface_replies_to_requester_origin() {
    let (host, mut host_inbox) = window(HOST);
    let (frame, _frame_inbox) = window(PLAYER);
    let mut surface = CommandSurface::new(HeadlessPlatform::new(), SurfaceConfig::default());

    surface.handle_envelope(
        &frame,
        Envelope {
            origin: HOST.to_string(),
            source: Some(host),
            data: json!({"action": "isReady", "args": [], "requestId": 9}),
        },
    );

    let reply = host_inbox.try_recv().unwrap();
    assert_eq!(reply.origin, PLAYER);
    match TransportMessage::decode(&reply.data, "KinoBridge") {
        Some(TransportMessage::Response(response)) => {
            assert_eq!(response.request_id, 9);
            assert_eq!(response.result, Some(json!(false)));
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_ignores_wrong_origin_events() {
    let (host, host_inbox) = window(HOST);
    let (frame, _frame_inbox) = window(PLAYER);
    let remote = RemoteController::new(Some(frame), host, host_inbox, BridgeConfig::for_origin(PLAYER));

    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();
    remote.on("onPlay", move |_| *counter.lock() += 1).unwrap();

    let event = json!({"event": "onPlay", "data": {"currentTime": 0}, "timestamp": 0});
    remote.handle_message(Envelope {
        origin: "https://evil.test".to_string(),
        source: None,
        data: event.clone(),
    });
    assert_eq!(*hits.lock(), 0);

    remote.handle_message(Envelope {
        origin: PLAYER.to_string(),
        source: None,
        data: event,
    });
    assert_eq!(*hits.lock(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_frame_times_out() {
    let (host, host_inbox) = window(HOST);
    let remote = RemoteController::connect(
        &FrameRegistry::new(),
        "not-rendered-yet",
        host,
        host_inbox,
        BridgeConfig::default(),
    );

    let started = tokio::time::Instant::now();
    let err = remote.play().await.unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_frame_times_out_and_late_reply_is_dropped() {
    let (host, host_inbox) = window(HOST);
    let (frame, mut frame_inbox) = window(PLAYER);
    let remote = RemoteController::new(Some(frame.clone()), host, host_inbox, BridgeConfig::for_origin(PLAYER));

    let err = remote.get_duration().await.unwrap_err();
    assert!(matches!(err, Error::Timeout));

    let request = frame_inbox.recv().await.unwrap();
    let request_id = request.data["requestId"].as_u64().unwrap();
    remote.handle_message(Envelope {
        origin: PLAYER.to_string(),
        source: Some(frame),
        data: json!({"type": "KinoBridgeResponse", "requestId": request_id, "result": 42}),
    });
    assert_eq!(remote.pending_requests(), 0);
}

// =============================================================================
// Surface without transport
// =============================================================================

#[test]
fn test_load_state_machine() {
    let mut surface = CommandSurface::new(HeadlessPlatform::new(), SurfaceConfig::default());
    assert_eq!(surface.load_state(), LoadState::Idle);

    surface.load_source("stream.m3u8", false);
    assert_eq!(surface.load_state(), LoadState::Ready);

    let mut unsupported = CommandSurface::new(
        HeadlessPlatform::new().with_streaming_support(false),
        SurfaceConfig::default(),
    );
    unsupported.load_source("stream.m3u8", false);
    assert_eq!(unsupported.load_state(), LoadState::Error);

    // A progressive source still works afterwards
    unsupported.load_source("clip.webm", false);
    assert_eq!(unsupported.load_state(), LoadState::Ready);
}

// =============================================================================
// HLS engine behind the surface
// =============================================================================

#[cfg(feature = "hls")]
mod hls {
    use super::*;
    use async_trait::async_trait;
    use kino_bridge::engine::EngineEventSender;
    use kino_bridge::{HlsEngine, ManifestSource, StreamingConfig, StreamingEngine};
    use std::collections::HashMap;
    use url::Url;

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
720p.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
1080p.m3u8
";

    const VOD_MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:6
#EXTINF:6.0,
seg0.ts
#EXT-X-ENDLIST
";

    struct StaticSource(HashMap<String, String>);

    #[async_trait]
    impl ManifestSource for StaticSource {
        async fn fetch(&self, url: &Url) -> kino_bridge::Result<String> {
            self.0
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::ManifestFetch(format!("404 {}", url)))
        }
    }

    fn hls_platform(entries: &[(&str, &str)]) -> HeadlessPlatform {
        let source: Arc<dyn ManifestSource> = Arc::new(StaticSource(
            entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        ));
        let base = Url::parse("https://cdn.test/").unwrap();

        HeadlessPlatform::new().with_streaming_factory(Box::new(
            move |config: &StreamingConfig, events: EngineEventSender| -> Box<dyn StreamingEngine> {
                Box::new(HlsEngine::new(config.clone(), events, source.clone()).with_base_url(base.clone()))
            },
        ))
    }

    #[tokio::test]
    async fn test_hls_manifest_drives_quality_menu() {
        let mut b = bridge(hls_platform(&[
            ("https://cdn.test/master.m3u8", MASTER),
            ("https://cdn.test/360p.m3u8", VOD_MEDIA),
        ]));

        b.remote.load_source("master.m3u8", true).await.unwrap();
        let parsed = wait_for(&mut b.events, "onManifestParsed").await;
        assert_eq!(parsed["qualities"][2]["height"], json!(1080));
        assert_eq!(parsed["isLive"], json!(false));
        wait_for(&mut b.events, "onPlay").await;

        assert_eq!(b.remote.get_quality().await.unwrap(), 0);
        b.remote.set_quality(720).await.unwrap();
        assert_eq!(b.remote.get_quality().await.unwrap(), 720);
        assert_eq!(b.remote.get_source().await.unwrap(), "master.m3u8");
    }

    #[tokio::test]
    async fn test_hls_fetch_failure_retries_up_to_cap() {
        let mut b = bridge_with(hls_platform(&[]), RecoveryPolicy::capped(2));

        b.remote.load_source("missing.m3u8", false).await.unwrap();

        // First failure plus two reloads
        for _ in 0..3 {
            let error = wait_for(&mut b.events, "onError").await;
            assert_eq!(
                error,
                json!({"message": "Network error", "type": "network", "fatal": true})
            );
        }

        assert!(!b.remote.is_ready().await.unwrap());
        assert!(drain(&mut b.events).is_empty());
    }
}
