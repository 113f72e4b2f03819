//! CLI command implementations

use crate::output::{self, format_output, OutputFormat};
use anyhow::{bail, Context};
use indicatif::ProgressBar;
use kino_bridge::command::ACTIONS;
use kino_bridge::engine::hls::{load_manifest, HlsEngine, HttpManifestSource, ManifestSource};
use kino_bridge::engine::EngineEventSender;
use kino_bridge::{
    window, BridgeConfig, CommandSurface, EventKind, FrameRegistry, HeadlessPlatform,
    QualityInfo, RemoteController, StreamingConfig, StreamingEngine, SurfaceConfig,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

const HOST_ORIGIN: &str = "kino://host";
const PLAYER_ORIGIN: &str = "kino://player";
const FRAME_ID: &str = "kino-player";

type EventRx = mpsc::UnboundedReceiver<(String, Value)>;

/// Read the surface configuration, or use defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SurfaceConfig> {
    let Some(path) = path else {
        return Ok(SurfaceConfig::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
}

/// Load a source into a headless player and run the steps against it
pub async fn run(
    source: &str,
    autoplay: bool,
    steps: &[String],
    offline: bool,
    ready_timeout: u64,
    config: SurfaceConfig,
    format: &str,
) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);

    let mut platform = HeadlessPlatform::new();
    if !offline {
        let manifests: Arc<dyn ManifestSource> = Arc::new(HttpManifestSource::new()?);
        platform = platform.with_streaming_factory(Box::new(
            move |config: &StreamingConfig, events: EngineEventSender| -> Box<dyn StreamingEngine> {
                Box::new(HlsEngine::new(config.clone(), events, manifests.clone()))
            },
        ));
    }

    let (host, host_inbox) = window(HOST_ORIGIN);
    let (frame, frame_inbox) = window(PLAYER_ORIGIN);
    let frames = FrameRegistry::new();
    frames.insert(FRAME_ID, frame.clone());

    let mut surface = CommandSurface::new(platform, config);
    surface.attach_parent(host.clone(), frame.clone());
    let surface = tokio::spawn(surface.run(frame, frame_inbox));

    let remote = RemoteController::connect(
        &frames,
        FRAME_ID,
        host,
        host_inbox,
        BridgeConfig::for_origin(PLAYER_ORIGIN),
    );
    let (tx, mut events) = mpsc::unbounded_channel();
    remote.on_any(move |name, data| {
        let _ = tx.send((name.to_string(), data.clone()));
    });

    if format == OutputFormat::Text {
        println!("Loading source: {}", source);
    }
    remote.load_source(source, autoplay).await?;

    let outcome = async {
        wait_until_ready(&mut events, Duration::from_secs(ready_timeout), format).await?;

        for step in steps {
            let (action, args) = parse_step(step);
            debug!(action = %action, args = ?args, "Running step");
            let result = remote.call(&action, args).await;
            flush_events(&mut events, format);
            output::print_result(&action, &result, format);
        }

        let state = remote.get_state().await?;
        flush_events(&mut events, format);
        output::print_state(&state, format);
        anyhow::Ok(())
    }
    .await;

    surface.abort();
    outcome
}

/// Print events until the player reports ready
async fn wait_until_ready(events: &mut EventRx, timeout: Duration, format: OutputFormat) -> anyhow::Result<()> {
    let spinner = (format == OutputFormat::Text).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_message("Waiting for player");
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let deadline = Instant::now() + timeout;
    let result = loop {
        let next = tokio::time::timeout_at(deadline, events.recv()).await;
        let Ok(Some((name, data))) = next else {
            break Err(anyhow::anyhow!("Player not ready after {}s", timeout.as_secs()));
        };

        match &spinner {
            Some(pb) => pb.suspend(|| output::print_event(&name, &data, format)),
            None => output::print_event(&name, &data, format),
        }

        if name == EventKind::Ready.as_str() {
            break Ok(());
        }
        // Errors without a recovery attempt end the load
        if name == EventKind::Error.as_str() && data.get("fatal").is_none() {
            let message = data["message"].as_str().unwrap_or("Unknown error").to_string();
            break Err(anyhow::anyhow!("Source failed: {}", message));
        }
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result
}

fn flush_events(events: &mut EventRx, format: OutputFormat) {
    while let Ok((name, data)) = events.try_recv() {
        output::print_event(&name, &data, format);
    }
}

/// Split "action:arg1,arg2" into an action and JSON arguments.
///
/// Arguments that are not valid JSON are sent as strings.
fn parse_step(step: &str) -> (String, Vec<Value>) {
    let Some((action, rest)) = step.split_once(':') else {
        return (step.trim().to_string(), Vec::new());
    };

    let args = rest
        .split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string())))
        .collect();

    (action.trim().to_string(), args)
}

#[derive(Tabled)]
struct LevelRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Quality")]
    label: String,
    #[tabled(rename = "Resolution")]
    resolution: String,
    #[tabled(rename = "Bitrate")]
    bitrate: String,
}

impl From<&QualityInfo> for LevelRow {
    fn from(q: &QualityInfo) -> Self {
        Self {
            index: q.index,
            label: q.label.clone(),
            resolution: format!("{}x{}", q.width, q.height),
            bitrate: format!("{:.0} kbps", q.bitrate as f64 / 1000.0),
        }
    }
}

/// Show the quality ladder of a manifest
pub async fn inspect(manifest_url: &str, format: &str) -> anyhow::Result<()> {
    let format = OutputFormat::from(format);
    let url = Url::parse(manifest_url).with_context(|| format!("Invalid manifest URL {}", manifest_url))?;

    let source = HttpManifestSource::new()?;
    let manifest = load_manifest(&source, &url).await?;
    if manifest.levels.is_empty() {
        bail!("Manifest has no playable levels");
    }

    let qualities: Vec<QualityInfo> = manifest.levels.iter().map(QualityInfo::from).collect();

    match format {
        OutputFormat::Json => println!(
            "{}",
            format_output(&json!({ "isLive": manifest.is_live, "qualities": qualities }), format)
        ),
        OutputFormat::Text => {
            println!("Manifest: {}", url);
            println!("  Live: {}", manifest.is_live);
            println!("  Levels: {}\n", qualities.len());
            let rows: Vec<LevelRow> = qualities.iter().map(LevelRow::from).collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

fn event_names() -> Vec<&'static str> {
    EventKind::ALL.iter().map(|k| k.as_str()).collect()
}

fn catalog() -> Value {
    json!({ "actions": ACTIONS.as_slice(), "events": event_names() })
}

/// List supported actions and events
pub fn actions(format: &str) {
    let events = event_names();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", format_output(&catalog(), OutputFormat::Json)),
        OutputFormat::Text => {
            println!("Actions:");
            for action in ACTIONS {
                println!("  {}", action);
            }
            println!("\nEvents:");
            for event in events {
                println!("  {}", event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step() {
        assert_eq!(parse_step("play"), ("play".to_string(), vec![]));
        assert_eq!(parse_step("seek:30"), ("seek".to_string(), vec![json!(30)]));
        assert_eq!(
            parse_step("loadSource:https://cdn.test/a.m3u8, true"),
            ("loadSource".to_string(), vec![json!("https://cdn.test/a.m3u8"), json!(true)])
        );
        assert_eq!(parse_step("setVolume:0.5"), ("setVolume".to_string(), vec![json!(0.5)]));
    }

    #[test]
    fn test_action_catalog() {
        let catalog = catalog();
        assert_eq!(catalog["actions"].as_array().unwrap().len(), ACTIONS.len());
        assert_eq!(catalog["actions"][0], "play");
        assert_eq!(catalog["events"].as_array().unwrap().len(), 15);
        assert!(catalog["events"].as_array().unwrap().contains(&json!("onManifestParsed")));

        actions("json");
        actions("text");
    }

    #[test]
    fn test_default_config_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.allowed_origin, "*");
    }

    #[tokio::test]
    async fn test_offline_run() {
        let steps = vec!["seek:30".to_string(), "getCurrentTime".to_string()];
        run("stream.m3u8", true, &steps, true, 5, SurfaceConfig::default(), "json")
            .await
            .unwrap();
    }
}
