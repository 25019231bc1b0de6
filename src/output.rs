use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};

use crate::error::{AppError, Result};
use crate::extract::ExtractionResult;
use crate::slack::Message;

const DEFAULT_OUTPUT_DIR: &str = "outputs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "markdown" => Ok(Self::Markdown),
            other => Err(AppError::InvalidFormat(other.to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Render the extraction result in the requested format.
pub fn render(result: &ExtractionResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)
            .map_err(|e| AppError::JsonSerialize(e.to_string())),
        OutputFormat::Markdown => Ok(render_markdown(result)),
    }
}

fn render_markdown(result: &ExtractionResult) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Slack user activity report".to_string());
    lines.push(String::new());
    lines.push(format!(
        "- Period: {} to {}",
        rfc3339(result.period.start),
        rfc3339(result.period.end)
    ));
    lines.push(format!(
        "- Target user: {} ({})",
        author_label(result, Some(result.target_user.as_str())),
        result.target_user
    ));
    lines.push(format!(
        "- Context: up to {} messages before and after each match",
        result.context_window
    ));
    lines.push(format!("- Messages: {}", result.summary.total_matches));
    lines.push(format!("- Channels: {}", result.summary.total_channels));
    lines.push(String::new());
    lines.push("Times are ISO 8601 (UTC). The matched line is marked with `<= TARGET`.".to_string());
    lines.push(String::new());

    for item in &result.matches {
        let target_ts = item.message.ts_value();
        lines.push(format!(
            "## #{} - {}",
            item.channel_name,
            ts_to_rfc3339(&item.message.ts)
        ));
        lines.push(String::new());
        lines.push("```".to_string());
        for m in item.context.iter().filter(|m| m.ts_value() < target_ts) {
            lines.push(context_line(result, m, false));
        }
        lines.push(context_line(result, &item.message, true));
        for m in item.context.iter().filter(|m| m.ts_value() > target_ts) {
            lines.push(context_line(result, m, false));
        }
        lines.push("```".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

fn context_line(result: &ExtractionResult, message: &Message, is_target: bool) -> String {
    let line = format!(
        "[{}] {}: {}",
        ts_to_rfc3339(&message.ts),
        author_label(result, message.user.as_deref()),
        message_text(message)
    );
    if is_target {
        format!("{line}  <= TARGET")
    } else {
        line
    }
}

fn author_label(result: &ExtractionResult, user: Option<&str>) -> String {
    match user {
        None => "unknown".to_string(),
        Some(id) => match result.display_names.get(id) {
            Some(name) => format!("@{name}"),
            None => id.to_string(),
        },
    }
}

fn message_text(message: &Message) -> String {
    let trimmed = message.text.as_deref().unwrap_or("").trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    match &message.subtype {
        Some(subtype) => format!("(no text / {subtype})"),
        None => "(no text)".to_string(),
    }
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn ts_to_rfc3339(ts: &str) -> String {
    ts.split('.')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(rfc3339)
        .unwrap_or_else(|| "unknown".to_string())
}

/// File name for a report. Templates may carry a `{datetime}` (or legacy
/// `{date}`) placeholder; an extension matching the format is appended when
/// the template has none.
pub fn build_file_name(
    template: Option<&str>,
    format: OutputFormat,
    now: DateTime<Local>,
) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();
    match template {
        None => format!("slack-activity-{stamp}.{}", format.extension()),
        Some(template) => {
            let mut name = template
                .replace("{datetime}", &stamp)
                .replace("{date}", &stamp);
            let lower = name.to_lowercase();
            if !lower.ends_with(".md") && !lower.ends_with(".json") {
                name.push('.');
                name.push_str(format.extension());
            }
            name
        }
    }
}

/// Write the rendered report below the output directory, creating it when
/// missing. Returns the full path written.
pub fn save_report(content: &str, file_name: &str, out_dir: &str) -> Result<PathBuf> {
    let dir = if out_dir.trim().is_empty() {
        Path::new(DEFAULT_OUTPUT_DIR)
    } else {
        Path::new(out_dir)
    };
    fs::create_dir_all(dir).map_err(|e| AppError::WriteFile {
        path: dir.display().to_string(),
        source: e,
    })?;

    let path = dir.join(file_name);
    fs::write(&path, content).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(path)
}
