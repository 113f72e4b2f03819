//! Named commands and argument coercion
//!
//! Arguments arrive as loosely typed JSON values, so every numeric argument
//! is parsed leniently ("0.3", 0.3 and "0.3s" all read as 0.3) and falls
//! back to a per-command default when it does not parse or parses to zero.
//! Booleans accept `true` and `"true"`; anything else is false.

use crate::{Error, Result};
use serde_json::Value;

/// Default step for `forward` / `rewind`, in seconds
pub const DEFAULT_SKIP_SECONDS: f64 = 10.0;

/// Every action name the surface answers to
pub const ACTIONS: [&str; 38] = [
    "play",
    "pause",
    "togglePlay",
    "stop",
    "restart",
    "seek",
    "forward",
    "rewind",
    "setVolume",
    "getVolume",
    "setMuted",
    "isMuted",
    "setSpeed",
    "getSpeed",
    "setQuality",
    "getQuality",
    "getQualities",
    "enterFullscreen",
    "exitFullscreen",
    "toggleFullscreen",
    "isFullscreen",
    "loadSource",
    "getSource",
    "getState",
    "getCurrentTime",
    "getDuration",
    "getBuffered",
    "isPlaying",
    "isPaused",
    "isLive",
    "isReady",
    "toggleCaptions",
    "enterPiP",
    "exitPiP",
    "showControls",
    "hideControls",
    "destroy",
    "getVersion",
];

/// A parsed command, ready to run against the surface
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Playback
    Play,
    Pause,
    TogglePlay,
    Stop,
    Restart,

    // Seeking
    Seek(f64),
    Forward(f64),
    Rewind(f64),

    // Volume
    SetVolume(f64),
    GetVolume,
    SetMuted(bool),
    IsMuted,

    // Speed
    SetSpeed(f64),
    GetSpeed,

    // Quality
    /// Target height; `None` when the argument was not a number
    SetQuality(Option<i64>),
    GetQuality,
    GetQualities,

    // Fullscreen
    EnterFullscreen,
    ExitFullscreen,
    ToggleFullscreen,
    IsFullscreen,

    // Source
    LoadSource { url: String, autoplay: bool },
    GetSource,

    // State
    GetState,
    GetCurrentTime,
    GetDuration,
    GetBuffered,
    IsPlaying,
    IsPaused,
    IsLive,
    IsReady,

    // Display
    /// `None` toggles
    ToggleCaptions(Option<bool>),
    EnterPip,
    ExitPip,
    ShowControls,
    HideControls,

    // Lifecycle
    Destroy,
    GetVersion,
}

impl Command {
    /// Parse `{action, args}` into a command
    pub fn parse(action: &str, args: &[Value]) -> Result<Self> {
        let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);

        let command = match action {
            "play" => Command::Play,
            "pause" => Command::Pause,
            "togglePlay" => Command::TogglePlay,
            "stop" => Command::Stop,
            "restart" => Command::Restart,

            "seek" => Command::Seek(number_or(arg(0), 0.0)),
            "forward" => Command::Forward(number_or(arg(0), DEFAULT_SKIP_SECONDS)),
            "rewind" => Command::Rewind(number_or(arg(0), DEFAULT_SKIP_SECONDS)),

            "setVolume" => Command::SetVolume(number_or(arg(0), 0.0).clamp(0.0, 1.0)),
            "getVolume" => Command::GetVolume,
            "setMuted" => Command::SetMuted(parse_bool(arg(0))),
            "isMuted" => Command::IsMuted,

            "setSpeed" => Command::SetSpeed(number_or(arg(0), 1.0)),
            "getSpeed" => Command::GetSpeed,

            "setQuality" => Command::SetQuality(parse_int(arg(0))),
            "getQuality" => Command::GetQuality,
            "getQualities" => Command::GetQualities,

            "enterFullscreen" => Command::EnterFullscreen,
            "exitFullscreen" => Command::ExitFullscreen,
            "toggleFullscreen" => Command::ToggleFullscreen,
            "isFullscreen" => Command::IsFullscreen,

            "loadSource" => {
                let url = arg(0).as_str().ok_or_else(|| Error::InvalidArgument {
                    action: action.to_string(),
                    reason: "url must be a string".to_string(),
                })?;
                Command::LoadSource {
                    url: url.to_string(),
                    autoplay: parse_bool(arg(1)),
                }
            }
            "getSource" => Command::GetSource,

            "getState" => Command::GetState,
            "getCurrentTime" => Command::GetCurrentTime,
            "getDuration" => Command::GetDuration,
            "getBuffered" => Command::GetBuffered,
            "isPlaying" => Command::IsPlaying,
            "isPaused" => Command::IsPaused,
            "isLive" => Command::IsLive,
            "isReady" => Command::IsReady,

            "toggleCaptions" => Command::ToggleCaptions(match arg(0) {
                Value::Null => None,
                other => Some(parse_bool(other)),
            }),
            "enterPiP" => Command::EnterPip,
            "exitPiP" => Command::ExitPip,
            "showControls" => Command::ShowControls,
            "hideControls" => Command::HideControls,

            "destroy" => Command::Destroy,
            "getVersion" => Command::GetVersion,

            other => return Err(Error::UnknownAction(other.to_string())),
        };

        Ok(command)
    }

    /// Wire action name
    pub fn action(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::TogglePlay => "togglePlay",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::Seek(_) => "seek",
            Command::Forward(_) => "forward",
            Command::Rewind(_) => "rewind",
            Command::SetVolume(_) => "setVolume",
            Command::GetVolume => "getVolume",
            Command::SetMuted(_) => "setMuted",
            Command::IsMuted => "isMuted",
            Command::SetSpeed(_) => "setSpeed",
            Command::GetSpeed => "getSpeed",
            Command::SetQuality(_) => "setQuality",
            Command::GetQuality => "getQuality",
            Command::GetQualities => "getQualities",
            Command::EnterFullscreen => "enterFullscreen",
            Command::ExitFullscreen => "exitFullscreen",
            Command::ToggleFullscreen => "toggleFullscreen",
            Command::IsFullscreen => "isFullscreen",
            Command::LoadSource { .. } => "loadSource",
            Command::GetSource => "getSource",
            Command::GetState => "getState",
            Command::GetCurrentTime => "getCurrentTime",
            Command::GetDuration => "getDuration",
            Command::GetBuffered => "getBuffered",
            Command::IsPlaying => "isPlaying",
            Command::IsPaused => "isPaused",
            Command::IsLive => "isLive",
            Command::IsReady => "isReady",
            Command::ToggleCaptions(_) => "toggleCaptions",
            Command::EnterPip => "enterPiP",
            Command::ExitPip => "exitPiP",
            Command::ShowControls => "showControls",
            Command::HideControls => "hideControls",
            Command::Destroy => "destroy",
            Command::GetVersion => "getVersion",
        }
    }
}

/// Lenient float parse: numbers as-is, strings by their numeric prefix
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_prefix(s),
        _ => None,
    }
}

/// Lenient integer parse: numbers truncated, strings by their digit prefix
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .char_indices()
                .find(|(_, c)| !c.is_ascii_digit())
                .map(|(i, _)| i)
                .unwrap_or(digits.len());
            digits[..end].parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

/// Parsed number, or `default` when unparseable or zero
pub fn number_or(value: &Value, default: f64) -> f64 {
    match parse_number(value) {
        Some(n) if n != 0.0 && !n.is_nan() => n,
        _ => default,
    }
}

/// `true` for the boolean and for its string encoding
pub fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    // Longest prefix that still parses as a float
    s.char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .find_map(|end| s[..end].parse::<f64>().ok())
        .filter(|n| !n.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_volume_clamped() {
        assert_eq!(Command::parse("setVolume", &[json!(-0.5)]).unwrap(), Command::SetVolume(0.0));
        assert_eq!(Command::parse("setVolume", &[json!(1.7)]).unwrap(), Command::SetVolume(1.0));
        assert_eq!(Command::parse("setVolume", &[json!("0.3")]).unwrap(), Command::SetVolume(0.3));
        assert_eq!(Command::parse("setVolume", &[json!("loud")]).unwrap(), Command::SetVolume(0.0));
    }

    #[test]
    fn test_numeric_fallbacks() {
        assert_eq!(Command::parse("seek", &[json!("42.5")]).unwrap(), Command::Seek(42.5));
        assert_eq!(Command::parse("seek", &[]).unwrap(), Command::Seek(0.0));
        assert_eq!(Command::parse("forward", &[]).unwrap(), Command::Forward(10.0));
        assert_eq!(Command::parse("rewind", &[json!("abc")]).unwrap(), Command::Rewind(10.0));
        assert_eq!(Command::parse("forward", &[json!(0)]).unwrap(), Command::Forward(10.0));
        assert_eq!(Command::parse("setSpeed", &[json!("1.5x")]).unwrap(), Command::SetSpeed(1.5));
        assert_eq!(Command::parse("setSpeed", &[json!(null)]).unwrap(), Command::SetSpeed(1.0));
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(Command::parse("setMuted", &[json!(true)]).unwrap(), Command::SetMuted(true));
        assert_eq!(Command::parse("setMuted", &[json!("true")]).unwrap(), Command::SetMuted(true));
        assert_eq!(Command::parse("setMuted", &[json!("yes")]).unwrap(), Command::SetMuted(false));
        assert_eq!(Command::parse("setMuted", &[json!(1)]).unwrap(), Command::SetMuted(false));
        assert_eq!(Command::parse("toggleCaptions", &[]).unwrap(), Command::ToggleCaptions(None));
        assert_eq!(
            Command::parse("toggleCaptions", &[json!("true")]).unwrap(),
            Command::ToggleCaptions(Some(true))
        );
    }

    #[test]
    fn test_quality_argument() {
        assert_eq!(Command::parse("setQuality", &[json!(720)]).unwrap(), Command::SetQuality(Some(720)));
        assert_eq!(Command::parse("setQuality", &[json!("1080p")]).unwrap(), Command::SetQuality(Some(1080)));
        assert_eq!(Command::parse("setQuality", &[json!(-1)]).unwrap(), Command::SetQuality(Some(-1)));
        assert_eq!(Command::parse("setQuality", &[json!("auto")]).unwrap(), Command::SetQuality(None));
    }

    #[test]
    fn test_load_source_arguments() {
        let cmd = Command::parse("loadSource", &[json!("stream.m3u8"), json!("true")]).unwrap();
        assert_eq!(
            cmd,
            Command::LoadSource { url: "stream.m3u8".into(), autoplay: true }
        );

        let cmd = Command::parse("loadSource", &[json!("clip.mp4")]).unwrap();
        assert_eq!(cmd, Command::LoadSource { url: "clip.mp4".into(), autoplay: false });

        let err = Command::parse("loadSource", &[json!(5)]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_unknown_action() {
        let err = Command::parse("selfDestruct", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action: selfDestruct");
    }

    #[test]
    fn test_action_names_parse_back() {
        for name in ACTIONS {
            let args = if name == "loadSource" { vec![json!("clip.mp4")] } else { vec![] };
            assert_eq!(Command::parse(name, &args).unwrap().action(), name);
        }
    }

    #[test]
    fn test_float_prefix() {
        assert_eq!(parse_number(&json!(" 12.5abc")), Some(12.5));
        assert_eq!(parse_number(&json!("-3")), Some(-3.0));
        assert_eq!(parse_number(&json!(".5")), Some(0.5));
        assert_eq!(parse_number(&json!("inf")), None);
        assert_eq!(parse_number(&json!("")), None);
        assert_eq!(parse_number(&json!(false)), None);
    }
}
