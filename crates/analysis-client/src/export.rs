//! CSV export of an analysis result.
//!
//! The layout is a two-column "item,value" report followed by the action
//! step table. Every cell is quoted and the file starts with a UTF-8 BOM so
//! spreadsheet tools pick the right encoding.

use std::path::{Path, PathBuf};

use analysis_lifecycle::{ActionStep, AnalysisResult};
use chrono::Utc;

use crate::error::ClientError;
use crate::report::NO_SUMMARY;

const BOM: &str = "\u{feff}";

/// Default export file name for a device.
pub fn default_file_name(device_id: &str) -> String {
    let device = if device_id.is_empty() {
        "unknown"
    } else {
        device_id
    };
    format!(
        "analysis_{}_{}.csv",
        device,
        Utc::now().format("%Y-%m-%dT%H-%M-%S")
    )
}

/// Human-readable file size: Bytes, KB, MB or GB, at most two decimals.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Render the CSV report for `result`.
///
/// `file_name` is the name of the analysed local file, if known.
pub fn export_csv(result: &AnalysisResult, device_id: &str, file_name: Option<&str>) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let row = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();

    rows.push(row(&["item", "value"]));
    rows.push(Vec::new());
    rows.push(row(&["device", device_id]));
    rows.push(row(&["analyzed file", file_name.unwrap_or("")]));
    rows.push(Vec::new());

    if let Some(video) = &result.video_info {
        rows.push(row(&["video info"]));
        rows.push(row(&["file name", &video.file_name]));
        rows.push(row(&["duration", &format!("{}s", video.duration)]));
        rows.push(row(&["resolution", &video.resolution]));
        rows.push(row(&["frame count", &video.frame_count.to_string()]));
        rows.push(row(&["file size", &format_file_size(video.size)]));
        rows.push(Vec::new());
    }

    if let Some(summary) = &result.summary {
        rows.push(row(&["summary"]));
        rows.push(row(&["total steps", &summary.total_steps.to_string()]));
        rows.push(row(&["passed steps", &summary.passed_steps.to_string()]));
        rows.push(row(&["failed steps", &summary.failed_steps.to_string()]));
        rows.push(row(&["score", &format!("{:.1}%", summary.score)]));
        rows.push(Vec::new());
    }

    if let Some(model) = &result.model_info {
        rows.push(row(&["model info"]));
        rows.push(row(&["models", &model.models.join(", ")]));
        rows.push(row(&["analysis time", &format!("{}s", model.analysis_time)]));
        rows.push(Vec::new());
    }

    rows.push(row(&["final summary"]));
    match result.final_summary.as_deref() {
        Some(text) if !text.is_empty() => {
            for line in text.split('\n') {
                rows.push(row(&[line]));
            }
        }
        _ => rows.push(row(&[NO_SUMMARY])),
    }
    rows.push(Vec::new());

    rows.push(row(&["action steps"]));
    rows.push(row(&[
        "order",
        "id",
        "name",
        "description",
        "time",
        "score",
        "result",
        "confidence",
    ]));
    for step in &result.action_steps {
        rows.push(step_row(step));
    }

    let body = rows
        .iter()
        .map(|cells| {
            cells
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}", BOM, body)
}

fn step_row(step: &ActionStep) -> Vec<String> {
    let times = if step.time.is_empty() {
        "not detected".to_string()
    } else {
        join(step.time.iter())
    };
    let scores = if step.score.is_empty() {
        "0".to_string()
    } else {
        join(step.score.iter())
    };
    let confidence = if step.confidence_score.is_empty() {
        "N/A".to_string()
    } else {
        step.confidence_score
            .iter()
            .map(|(t, c)| format!("{}s:{}%", t, (c * 100.0).round() as i64))
            .collect::<Vec<_>>()
            .join(", ")
    };
    vec![
        step.order.to_string(),
        step.id.clone(),
        step.name.clone(),
        step.description.clone(),
        times,
        scores,
        step.result.to_string(),
        confidence,
    ]
}

fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

/// Write the CSV report to `path`, or to the default name in the current
/// directory when `path` is a directory.
pub async fn write_csv(
    path: &Path,
    result: &AnalysisResult,
    device_id: &str,
    file_name: Option<&str>,
) -> Result<PathBuf, ClientError> {
    let target = if tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        path.join(default_file_name(device_id))
    } else {
        path.to_path_buf()
    };
    tokio::fs::write(&target, export_csv(result, device_id, file_name)).await?;
    Ok(target)
}
