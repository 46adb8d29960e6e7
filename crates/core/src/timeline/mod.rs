//! Timeline events and the algorithms that produce them.
//!
//! A timeline is a list of cut points. Assembly reads consecutive cut points
//! as interval boundaries: a [`StemCut`] at time `t` closes the hold that
//! started at the previous boundary. Intro and outro events carry explicit
//! ends instead.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{SectionLabel, Transforms};

mod bookends;
mod synth;

pub use bookends::{inject_bookends, BookendPlan};
pub use synth::{SynthesisParams, TimelineSynthesizer};

/// Cut to a stem's matching video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemCut {
    pub time: f64,
    pub stem: String,
    pub beat_index: usize,
    pub section: SectionLabel,
}

/// Cut to an unsynced B-roll clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeClipCut {
    pub start: f64,
    pub end: Option<f64>,
    pub clip: PathBuf,
    pub transforms: Transforms,
    pub beat_index: usize,
    pub section: SectionLabel,
}

/// Fixed clip pinned to the start or end of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookend {
    pub start: f64,
    pub end: f64,
    pub clip: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineEvent {
    StemCut(StemCut),
    FreeClip(FreeClipCut),
    Intro(Bookend),
    Outro(Bookend),
}

impl TimelineEvent {
    /// Position of the event on the song timeline.
    pub fn time(&self) -> f64 {
        match self {
            Self::StemCut(cut) => cut.time,
            Self::FreeClip(cut) => cut.start,
            Self::Intro(b) | Self::Outro(b) => b.start,
        }
    }

    /// End carried by the event itself, if any.
    pub fn explicit_end(&self) -> Option<f64> {
        match self {
            Self::StemCut(_) => None,
            Self::FreeClip(cut) => cut.end,
            Self::Intro(b) | Self::Outro(b) => Some(b.end),
        }
    }

    /// Where assembly closes the interval this event renders.
    pub fn effective_end(&self) -> f64 {
        self.explicit_end().unwrap_or_else(|| self.time())
    }

    pub fn is_bookend(&self) -> bool {
        matches!(self, Self::Intro(_) | Self::Outro(_))
    }

    /// Clip played by free, intro and outro events.
    pub fn clip(&self) -> Option<&Path> {
        match self {
            Self::StemCut(_) => None,
            Self::FreeClip(cut) => Some(&cut.clip),
            Self::Intro(b) | Self::Outro(b) => Some(&b.clip),
        }
    }

    pub fn stem(&self) -> Option<&str> {
        match self {
            Self::StemCut(cut) => Some(&cut.stem),
            _ => None,
        }
    }
}

/// Stable sort by event time; events at equal times keep their order.
pub fn sort_events(events: &mut [TimelineEvent]) {
    events.sort_by(|a, b| a.time().total_cmp(&b.time()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cut(time: f64, stem: &str) -> TimelineEvent {
        TimelineEvent::StemCut(StemCut {
            time,
            stem: stem.to_string(),
            beat_index: 0,
            section: SectionLabel::Verse,
        })
    }

    #[test]
    fn effective_end_prefers_explicit_end() {
        let intro = TimelineEvent::Intro(Bookend {
            start: 0.0,
            end: 3.0,
            clip: PathBuf::from("intro.mp4"),
        });
        assert_eq!(intro.time(), 0.0);
        assert_eq!(intro.effective_end(), 3.0);
        assert_eq!(cut(4.0, "drums").effective_end(), 4.0);
    }

    #[test]
    fn sorting_is_stable_for_equal_times() {
        let mut events = vec![cut(2.0, "b"), cut(1.0, "a"), cut(2.0, "c")];
        sort_events(&mut events);
        let stems: Vec<_> = events.iter().filter_map(|e| e.stem()).collect();
        assert_eq!(stems, vec!["a", "b", "c"]);
    }

    #[test]
    fn serialises_with_type_tag() {
        let json = serde_json::to_value(cut(1.5, "bass")).unwrap();
        assert_eq!(json["type"], "stem_cut");
        assert_eq!(json["stem"], "bass");
        assert_eq!(json["section"], "verse");
    }
}
