use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::render::file_label;
use crate::timeline::TimelineEvent;
use crate::Result;

/// One consumed interval of the final timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditSummaryRecord {
    pub source_label: String,
    pub timeline_start: f64,
    pub timeline_end: f64,
    pub source_start: f64,
    pub duration: f64,
}

fn millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Pairs each event with its successor; the last event only closes the
/// previous interval.
pub fn summarize(events: &[TimelineEvent]) -> Vec<EditSummaryRecord> {
    events
        .windows(2)
        .map(|pair| {
            let (event, next) = (&pair[0], &pair[1]);
            let start = event.time();
            let end = next.time();
            let (source_label, source_start) = match event {
                TimelineEvent::StemCut(cut) => (cut.stem.clone(), start),
                TimelineEvent::FreeClip(cut) => (file_label(&cut.clip), 0.0),
                TimelineEvent::Intro(b) | TimelineEvent::Outro(b) => (file_label(&b.clip), 0.0),
            };
            EditSummaryRecord {
                source_label,
                timeline_start: millis(start),
                timeline_end: millis(end),
                source_start: millis(source_start),
                duration: millis(end - start),
            }
        })
        .collect()
}

/// Where the summary for a render at `output` is written.
pub fn summary_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

/// Writes the summary as pretty JSON next to `output` and returns its path.
pub fn write_summary(events: &[TimelineEvent], output: &Path) -> Result<PathBuf> {
    let path = summary_path(output);
    let records = summarize(events);
    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(&path, json)?;
    debug!(path = %path.display(), records = records.len(), "wrote edit summary");
    Ok(path)
}
