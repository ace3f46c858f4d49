//! Plain-text rendering of an analysis result.

use std::fmt::Write;
use std::time::Duration;

use analysis_lifecycle::{format_elapsed, AnalysisResult};

pub(crate) const NO_SUMMARY: &str = "No summary available.";

/// Render a result as a human-readable report.
///
/// `elapsed` is the client-measured duration of the session; when absent the
/// server-reported analysis time is used.
pub fn render_summary(result: &AnalysisResult, elapsed: Option<Duration>) -> String {
    let mut out = String::new();

    if let Some(video) = &result.video_info {
        let _ = writeln!(out, "File:          {}", or_dash(&video.file_name));
        let _ = writeln!(out, "Duration:      {:.1}s", video.duration);
        let _ = writeln!(out, "Resolution:    {}", or_dash(&video.resolution));
        let frames = if video.frame_count > 0 {
            video.frame_count.to_string()
        } else {
            "-".to_string()
        };
        let _ = writeln!(out, "Frames:        {}", frames);
    }

    if let Some(summary) = &result.summary {
        let _ = writeln!(
            out,
            "Steps:         {} total, {} passed, {} failed",
            summary.total_steps, summary.passed_steps, summary.failed_steps
        );
        let _ = writeln!(out, "Score:         {:.1}%", summary.score);
    }

    if let Some(model) = &result.model_info {
        let _ = writeln!(out, "Models:        {}", model.models.join(", "));
        let elapsed = elapsed.unwrap_or_else(|| {
            Duration::from_secs(model.analysis_time.max(0.0).floor() as u64)
        });
        let _ = writeln!(out, "Analysis time: {}", format_elapsed(elapsed));
    }

    out.push_str("\nFinal summary:\n");
    match result.final_summary.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            for line in text.lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        _ => {
            let _ = writeln!(out, "  {}", NO_SUMMARY);
        }
    }

    if !result.action_steps.is_empty() {
        out.push_str("\nAction steps:\n");
        for step in &result.action_steps {
            let _ = writeln!(out, "  {}. {}: {}", step.order, step.name, step.result);
        }
    }

    if !result.individual_html_paths.is_empty() {
        out.push_str("\nStep reports:\n");
        for path in &result.individual_html_paths {
            let _ = writeln!(out, "  {}", path);
        }
    }

    out
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
