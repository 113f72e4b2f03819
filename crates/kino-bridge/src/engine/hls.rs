//! HLS streaming engine
//!
//! Fetches and parses the multivariant playlist in a background task, then
//! reports `ManifestParsed`. Implements:
//! - master playlists (one level per non I-frame variant)
//! - media playlists as entry point (single level)
//! - live detection from the absence of EXT-X-ENDLIST
//! - reload after fatal network errors via `start_load`

use super::{EngineEventSender, MediaElement, StreamErrorKind, StreamingEngine, StreamingEvent};
use crate::{error::Error, types::{QualityLevel, StreamingConfig}, Result};
use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, Playlist};
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where playlists come from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Playlists fetched over HTTP
pub struct HttpManifestSource {
    client: Client,
}

impl HttpManifestSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!("Fetching HLS playlist: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::ManifestFetch(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| Error::ManifestFetch(e.to_string()))
    }
}

/// Result of parsing the entry playlist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedManifest {
    pub levels: Vec<QualityLevel>,
    pub is_live: bool,
}

#[derive(Default)]
struct ManifestState {
    parsed: Option<ParsedManifest>,
}

/// Streaming engine backed by a [`ManifestSource`]
pub struct HlsEngine {
    config: StreamingConfig,
    events: EngineEventSender,
    source: Arc<dyn ManifestSource>,
    base_url: Option<Url>,
    url: Option<Url>,
    state: Arc<Mutex<ManifestState>>,
    task: Option<JoinHandle<()>>,
    current_level: i64,
}

impl HlsEngine {
    pub fn new(config: StreamingConfig, events: EngineEventSender, source: Arc<dyn ManifestSource>) -> Self {
        Self {
            config,
            events,
            source,
            base_url: None,
            url: None,
            state: Arc::new(Mutex::new(ManifestState::default())),
            task: None,
            current_level: -1,
        }
    }

    /// Base used to resolve relative source URLs
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base_url = Some(base);
        self
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        match &self.base_url {
            Some(base) => base.join(url),
            None => Url::parse(url),
        }
        .map_err(|e| Error::Unsupported(format!("Invalid source URL '{}': {}", url, e)))
    }

    fn spawn_load(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let source = self.source.clone();
        let state = self.state.clone();
        let events = self.events.clone();

        self.task = Some(tokio::spawn(async move {
            match load_manifest(source.as_ref(), &url).await {
                Ok(manifest) => {
                    info!(
                        url = %url,
                        levels = manifest.levels.len(),
                        is_live = manifest.is_live,
                        "Manifest parsed"
                    );
                    state.lock().parsed = Some(manifest);
                    events.streaming(StreamingEvent::ManifestParsed);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Manifest load failed");
                    events.streaming(StreamingEvent::Error {
                        kind: StreamErrorKind::Network,
                        fatal: true,
                        details: e.to_string(),
                    });
                }
            }
        }));
    }
}

impl StreamingEngine for HlsEngine {
    fn load_source(&mut self, url: &str) {
        debug!(url, config = ?self.config, "HLS load");
        match self.resolve(url) {
            Ok(resolved) => {
                self.url = Some(resolved);
                self.state.lock().parsed = None;
                self.spawn_load();
            }
            Err(e) => {
                self.events.streaming(StreamingEvent::Error {
                    kind: StreamErrorKind::Other,
                    fatal: true,
                    details: e.to_string(),
                });
            }
        }
    }

    fn attach_media(&mut self, media: &mut dyn MediaElement) {
        if let Some(url) = &self.url {
            media.set_src(url.as_str());
        }
    }

    fn levels(&self) -> Vec<QualityLevel> {
        self.state
            .lock()
            .parsed
            .as_ref()
            .map(|m| m.levels.clone())
            .unwrap_or_default()
    }

    fn current_level(&self) -> i64 {
        self.current_level
    }

    fn set_current_level(&mut self, index: i64) {
        debug!(index, "HLS level switch");
        self.current_level = index;
    }

    fn is_live(&self) -> bool {
        self.state.lock().parsed.as_ref().is_some_and(|m| m.is_live)
    }

    fn start_load(&mut self) {
        info!("Restarting HLS load");
        self.spawn_load();
    }

    fn recover_media_error(&mut self) {
        // Nothing is decoded here; a fresh level selection is all there is
        info!("Recovering HLS media error");
        self.current_level = -1;
    }

    fn destroy(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.url = None;
        self.state.lock().parsed = None;
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Fetch and parse the entry playlist.
///
/// For a master playlist the first variant's media playlist is fetched as
/// well to find out whether the stream is live.
pub async fn load_manifest(source: &dyn ManifestSource, url: &Url) -> Result<ParsedManifest> {
    let content = source.fetch(url).await?;

    match parse_playlist(&content)? {
        Playlist::MasterPlaylist(master) => {
            let levels = extract_levels(&master);
            if levels.is_empty() {
                return Err(Error::ManifestParse("No variants in master playlist".to_string()));
            }

            let is_live = match first_variant_url(&master, url) {
                Some(variant_url) => match source.fetch(&variant_url).await {
                    Ok(media) => matches!(
                        parse_playlist(&media),
                        Ok(Playlist::MediaPlaylist(ref m)) if !m.end_list
                    ),
                    Err(e) => {
                        debug!(error = %e, "Variant playlist unavailable, assuming VOD");
                        false
                    }
                },
                None => false,
            };

            Ok(ParsedManifest { levels, is_live })
        }
        Playlist::MediaPlaylist(media) => Ok(ParsedManifest {
            levels: vec![QualityLevel { index: 0, height: 0, width: 0, bitrate: 0 }],
            is_live: !media.end_list,
        }),
    }
}

fn parse_playlist(content: &str) -> Result<Playlist> {
    m3u8_rs::parse_playlist_res(content.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS playlist: {:?}", e)))
}

/// One level per playable variant, in manifest order
fn extract_levels(master: &MasterPlaylist) -> Vec<QualityLevel> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .enumerate()
        .map(|(index, variant)| {
            let (width, height) = variant
                .resolution
                .map(|r| (r.width as u32, r.height as u32))
                .unwrap_or((0, 0));
            QualityLevel {
                index,
                height,
                width,
                bitrate: variant.bandwidth,
            }
        })
        .collect()
}

fn first_variant_url(master: &MasterPlaylist, base: &Url) -> Option<Url> {
    master
        .variants
        .iter()
        .find(|v| !v.is_i_frame)
        .and_then(|v| base.join(&v.uri).ok())
}
