use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis::percentile;
use crate::audio::Envelope;

/// Median filter width in frames used to suppress transient spikes.
pub const SMOOTHING_WINDOW: usize = 31;
/// Energy percentile separating chorus from verse.
pub const CHORUS_PERCENTILE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionLabel {
    Verse,
    Chorus,
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verse => f.write_str("verse"),
            Self::Chorus => f.write_str("chorus"),
        }
    }
}

/// Contiguous region of the song with a single energy label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub end: f64,
    pub label: SectionLabel,
}

/// Ordered sections tiling `[0, duration]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionMap {
    sections: Vec<Section>,
}

impl SectionMap {
    /// Labels the song from its full-mix RMS envelope.
    pub fn segment(envelope: &Envelope) -> Self {
        let duration = envelope.duration.max(0.0);
        if envelope.values.is_empty() {
            return Self {
                sections: vec![Section {
                    start: 0.0,
                    end: duration,
                    label: SectionLabel::Verse,
                }],
            };
        }

        let smoothed = median_filter(&envelope.values, SMOOTHING_WINDOW);
        let threshold = percentile(&smoothed, CHORUS_PERCENTILE);

        let mut sections: Vec<Section> = Vec::new();
        for (time, energy) in envelope.times.iter().zip(&smoothed) {
            let label = if f64::from(*energy) >= threshold {
                SectionLabel::Chorus
            } else {
                SectionLabel::Verse
            };
            match sections.last() {
                Some(current) if current.label == label => {}
                _ => sections.push(Section {
                    start: *time,
                    end: *time,
                    label,
                }),
            }
        }

        if let Some(first) = sections.first_mut() {
            first.start = 0.0;
        }
        let starts: Vec<f64> = sections.iter().skip(1).map(|s| s.start).collect();
        for (section, next_start) in sections.iter_mut().zip(starts) {
            section.end = next_start;
        }
        if let Some(last) = sections.last_mut() {
            last.end = duration.max(last.start);
        }

        Self { sections }
    }

    pub fn from_sections(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Label of the section whose `[start, end)` contains `time`; verse when
    /// no section does.
    pub fn label_at(&self, time: f64) -> SectionLabel {
        self.sections
            .iter()
            .find(|s| s.start <= time && time < s.end)
            .map(|s| s.label)
            .unwrap_or(SectionLabel::Verse)
    }
}

/// Running median with zero padding at both edges.
fn median_filter(values: &[f32], window: usize) -> Vec<f32> {
    let half = window / 2;
    let mut scratch = Vec::with_capacity(window);
    (0..values.len())
        .map(|index| {
            scratch.clear();
            for offset in 0..window {
                let source = (index + offset).checked_sub(half);
                scratch.push(source.and_then(|s| values.get(s)).copied().unwrap_or(0.0));
            }
            scratch.sort_by(f32::total_cmp);
            scratch[half]
        })
        .collect()
}
