//! Output formatting for CLI

use console::style;
use kino_bridge::PlayerStateSnapshot;
use serde::Serialize;
use serde_json::{json, Value};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Text => serde_json::to_string_pretty(data).unwrap_or_default(),
    }
}

/// One forwarded player event
pub fn print_event(name: &str, data: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", json!({ "event": name, "data": data })),
        OutputFormat::Text => println!("  {} {}", style(name).cyan(), style(data).dim()),
    }
}

/// Outcome of one command
pub fn print_result(action: &str, result: &kino_bridge::Result<Value>, format: OutputFormat) {
    match (format, result) {
        (OutputFormat::Json, Ok(value)) => println!("{}", json!({ "action": action, "result": value })),
        (OutputFormat::Json, Err(e)) => println!(
            "{}",
            json!({ "action": action, "error": e.to_string(), "code": e.error_code() })
        ),
        (OutputFormat::Text, Ok(Value::Null)) => println!("{} {}", style("✓").green(), action),
        (OutputFormat::Text, Ok(value)) => println!("{} {} → {}", style("✓").green(), action, value),
        (OutputFormat::Text, Err(e)) => println!("{} {}: {}", style("✗").red(), action, e),
    }
}

pub fn print_state(state: &PlayerStateSnapshot, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!("{}", json!({ "state": state }));
        return;
    }

    let flag = |on: bool| if on { style("yes").green() } else { style("no").dim() };

    println!("\nPlayer State:");
    println!("  Ready: {}", flag(state.is_ready));
    println!("  Playing: {}", flag(state.is_playing));
    println!("  Live: {}", flag(state.is_live));
    println!("  Position: {:.1}s / {:.1}s", state.current_time, state.duration);
    println!("  Volume: {:.2}{}", state.volume, if state.muted { " (muted)" } else { "" });
    println!("  Speed: {}x", state.speed);
    match state.quality {
        q if q > 0 => println!("  Quality: {}p", q),
        _ => println!("  Quality: auto"),
    }
}
