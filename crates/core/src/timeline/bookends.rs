use std::path::PathBuf;

use tracing::{debug, warn};

use super::{sort_events, Bookend, TimelineEvent};
use crate::beats::next_beat_after;

/// Intro and outro clips plus their minimum on-screen durations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookendPlan {
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
    pub intro_min: f64,
    pub outro_min: f64,
}

/// Pins the intro to `[0, first beat >= intro_min]` and the outro to
/// `[first beat >= song_length - outro_min, song_length]`. Synthesised cuts
/// inside either window are dropped; the closing cut at `song_length` stays.
pub fn inject_bookends(
    mut events: Vec<TimelineEvent>,
    beats: &[f64],
    song_length: f64,
    plan: &BookendPlan,
) -> Vec<TimelineEvent> {
    let in_song: Vec<f64> = beats.iter().copied().filter(|b| *b < song_length).collect();

    if let Some(clip) = &plan.intro {
        let end = next_beat_after(&in_song, plan.intro_min).clamp(0.0, song_length);
        if end > 0.0 {
            events.retain(|event| event.time() >= end);
            debug!(end, "intro placed");
            events.push(TimelineEvent::Intro(Bookend {
                start: 0.0,
                end,
                clip: clip.clone(),
            }));
        } else {
            warn!(?clip, "intro window is empty, skipping");
        }
    }

    if let Some(clip) = &plan.outro {
        let start =
            next_beat_after(&in_song, song_length - plan.outro_min).clamp(0.0, song_length);
        if start < song_length {
            events.retain(|event| event.time() <= start || event.time() >= song_length);
            debug!(start, "outro placed");
            events.push(TimelineEvent::Outro(Bookend {
                start,
                end: song_length,
                clip: clip.clone(),
            }));
        } else {
            warn!(?clip, "outro window is empty, skipping");
        }
    }

    sort_events(&mut events);
    events
}
