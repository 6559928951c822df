use anyhow::{bail, Result};
use hookwarden_core::monitor::LogEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "csv" => Ok(Self::Csv),
            other => bail!("unknown export format '{other}' (expected json, jsonl or csv)"),
        }
    }
}

const CSV_HEADER: &str = "timestamp,hook,event,file,duration_ms,details,pid,session_id";

pub fn render(events: &[LogEvent], format: ExportFormat) -> Result<String> {
    let out = match format {
        ExportFormat::Json => serde_json::to_string_pretty(events)? + "\n",
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for event in events {
                out.push_str(&serde_json::to_string(event)?);
                out.push('\n');
            }
            out
        }
        ExportFormat::Csv => {
            let mut out = String::from(CSV_HEADER);
            out.push('\n');
            for e in events {
                let row = [
                    e.timestamp.to_rfc3339(),
                    e.hook.clone(),
                    e.event.to_string(),
                    e.file.clone().unwrap_or_default(),
                    e.duration_ms.to_string(),
                    e.details.clone(),
                    e.pid.to_string(),
                    e.session_id.clone(),
                ];
                let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
                out.push_str(&fields.join(","));
                out.push('\n');
            }
            out
        }
    };
    Ok(out)
}

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
