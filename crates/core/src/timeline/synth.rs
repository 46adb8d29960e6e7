use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::debug;

use super::{FreeClipCut, StemCut, TimelineEvent};
use crate::stems::{is_vocal, StemEnergyIndex, StemLevel};
use crate::{FreeClipCycler, RenderConfig, Result, SectionLabel, SectionMap, StemSyncError};

/// Cuts this close to the end of the song never become free clips.
const FINAL_CUT_MARGIN: f64 = 0.05;

/// Tuning knobs for one synthesis run.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    pub song_length: f64,
    pub cooldown: f64,
    pub chorus_aggression: f64,
    pub phrase_beats: u32,
    pub downbeat_bias: u32,
    pub free_clip_probability: f64,
    pub vocal_fallback_guard: bool,
}

impl SynthesisParams {
    pub fn from_config(config: &RenderConfig, song_length: f64) -> Self {
        Self {
            song_length,
            cooldown: config.cooldown,
            chorus_aggression: config.chorus_aggression,
            phrase_beats: config.phrase_beats,
            downbeat_bias: config.downbeat_bias,
            free_clip_probability: config.free_clip_probability,
            vocal_fallback_guard: config.vocal_fallback_guard,
        }
    }

    /// Beats a shot must hold before the next cut in the given section.
    pub fn min_hold_beats(&self, section: SectionLabel) -> usize {
        let phrase = f64::from(self.phrase_beats.max(1));
        match section {
            SectionLabel::Chorus => {
                (phrase * (1.0 - self.chorus_aggression)).round().max(1.0) as usize
            }
            SectionLabel::Verse => phrase as usize,
        }
    }
}

/// Decides, beat by beat, which source is on screen.
#[derive(Debug)]
pub struct TimelineSynthesizer<'a> {
    energy: &'a StemEnergyIndex,
    sections: &'a SectionMap,
    stems: Vec<&'a str>,
    params: SynthesisParams,
    cycler: Option<FreeClipCycler>,
}

impl<'a> TimelineSynthesizer<'a> {
    /// Only stems present in both `energy` and `videos` take part.
    pub fn new(
        energy: &'a StemEnergyIndex,
        videos: &BTreeMap<String, PathBuf>,
        sections: &'a SectionMap,
        params: SynthesisParams,
    ) -> Result<Self> {
        let stems: Vec<&str> = energy
            .ids()
            .filter(|id| videos.contains_key(*id))
            .collect();
        if stems.is_empty() {
            return Err(StemSyncError::NoMatchingStems);
        }
        Ok(Self {
            energy,
            sections,
            stems,
            params,
            cycler: None,
        })
    }

    /// Lets cuts be replaced by B-roll from `cycler`.
    pub fn with_free_clips(mut self, cycler: Option<FreeClipCycler>) -> Self {
        self.cycler = cycler;
        self
    }

    pub fn stems(&self) -> &[&'a str] {
        &self.stems
    }

    /// Walks the beat clock and returns cut points ending at `song_length`.
    pub fn synthesize<R: Rng + ?Sized>(
        &mut self,
        beats: &[f64],
        rng: &mut R,
    ) -> Vec<TimelineEvent> {
        let song_length = self.params.song_length;
        let bias = self.params.downbeat_bias as usize;

        let mut events = Vec::new();
        let mut current: &'a str = self.stems[0];
        let mut last_used: HashMap<&'a str, f64> =
            self.stems.iter().map(|s| (*s, f64::NEG_INFINITY)).collect();
        let mut last_cut_beat: Option<usize> = None;

        for (index, &time) in beats.iter().enumerate() {
            if time >= song_length {
                break;
            }
            if bias > 0 && index % bias != 0 {
                continue;
            }

            let section = self.sections.label_at(time);
            let min_beats = self.params.min_hold_beats(section);
            if last_cut_beat.is_some_and(|last| index - last < min_beats) {
                continue;
            }

            let levels: Vec<StemLevel<'a>> = self
                .energy
                .levels_at(time)
                .into_iter()
                .filter(|level| self.stems.contains(&level.stem))
                .collect();
            let any_active = levels.iter().any(|level| level.active);

            let best = levels
                .iter()
                .filter(|level| level.active && level.stem != current)
                .filter(|level| time - last_used[level.stem] >= self.params.cooldown)
                .fold(None::<&StemLevel<'a>>, |best, level| match best {
                    Some(b) if b.energy >= level.energy => Some(b),
                    _ => Some(level),
                });

            let chosen = match best {
                Some(level) => level.stem,
                None if !any_active => match self.fallback(current, rng) {
                    Some(stem) => stem,
                    None => continue,
                },
                None => {
                    debug!(time, "every active stem is cooling down");
                    continue;
                }
            };

            let is_final_cut = time >= song_length - FINAL_CUT_MARGIN;
            let probability = self.params.free_clip_probability;
            let free_clip = match self.cycler.as_mut() {
                Some(cycler) if !is_final_cut && rng.random::<f64>() < probability => {
                    let (clip, transforms) = cycler.advance();
                    Some((clip.to_path_buf(), transforms))
                }
                _ => None,
            };

            let event = match free_clip {
                Some((clip, transforms)) => {
                    debug!(time, ?clip, ?transforms, "free clip");
                    TimelineEvent::FreeClip(FreeClipCut {
                        start: time,
                        end: None,
                        clip,
                        transforms,
                        beat_index: index,
                        section,
                    })
                }
                None => {
                    debug!(time, stem = chosen, %section, "stem cut");
                    TimelineEvent::StemCut(StemCut {
                        time,
                        stem: chosen.to_string(),
                        beat_index: index,
                        section,
                    })
                }
            };
            events.push(event);

            last_used.insert(chosen, time);
            current = chosen;
            last_cut_beat = Some(index);
        }

        let needs_close = events
            .last()
            .map(|event: &TimelineEvent| event.time() < song_length)
            .unwrap_or(true);
        if needs_close {
            events.push(TimelineEvent::StemCut(StemCut {
                time: song_length,
                stem: current.to_string(),
                beat_index: beats.len(),
                section: self.sections.label_at(song_length),
            }));
        }

        events
    }

    /// Random pick among the other stems when nothing is audible.
    fn fallback<R: Rng + ?Sized>(&self, current: &str, rng: &mut R) -> Option<&'a str> {
        let others: Vec<&'a str> = self
            .stems
            .iter()
            .copied()
            .filter(|stem| *stem != current)
            .collect();

        let pool = if self.params.vocal_fallback_guard {
            let instrumental: Vec<&'a str> =
                others.iter().copied().filter(|stem| !is_vocal(stem)).collect();
            if instrumental.is_empty() {
                others
            } else {
                instrumental
            }
        } else {
            others
        };

        pool.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Envelope;
    use crate::sections::Section;
    use crate::stems::StemAudioAnalysis;
    use crate::Transforms;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Stem whose energy is `level` on each whole second and zero halfway
    /// between, so it is audible exactly on integer beats.
    fn pulsing(levels: &[f32]) -> StemAudioAnalysis {
        let mut times = Vec::new();
        let mut values = Vec::new();
        for (second, level) in levels.iter().enumerate() {
            times.push(second as f64);
            values.push(*level);
            times.push(second as f64 + 0.5);
            values.push(0.0);
        }
        StemAudioAnalysis::new(Envelope {
            duration: levels.len() as f64,
            times,
            values,
        })
    }

    fn index(stems: &[(&str, &[f32])]) -> (StemEnergyIndex, BTreeMap<String, PathBuf>) {
        let energy = stems
            .iter()
            .map(|(id, levels)| (id.to_string(), pulsing(levels)))
            .collect();
        let videos = stems
            .iter()
            .map(|(id, _)| (id.to_string(), PathBuf::from(format!("{id}.mp4"))))
            .collect();
        (energy, videos)
    }

    fn verse(length: f64) -> SectionMap {
        SectionMap::from_sections(vec![Section {
            start: 0.0,
            end: length,
            label: SectionLabel::Verse,
        }])
    }

    fn chorus(length: f64) -> SectionMap {
        SectionMap::from_sections(vec![Section {
            start: 0.0,
            end: length,
            label: SectionLabel::Chorus,
        }])
    }

    fn params(song_length: f64) -> SynthesisParams {
        SynthesisParams {
            song_length,
            cooldown: 0.0,
            chorus_aggression: 0.5,
            phrase_beats: 1,
            downbeat_bias: 0,
            free_clip_probability: 0.0,
            vocal_fallback_guard: false,
        }
    }

    fn beats(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    fn stems_of(events: &[TimelineEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.stem()).collect()
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn hold_length_depends_on_section() {
        let mut p = params(10.0);
        p.phrase_beats = 4;
        assert_eq!(p.min_hold_beats(SectionLabel::Verse), 4);
        assert_eq!(p.min_hold_beats(SectionLabel::Chorus), 2);
        p.chorus_aggression = 1.0;
        assert_eq!(p.min_hold_beats(SectionLabel::Chorus), 1);
        p.chorus_aggression = 0.0;
        assert_eq!(p.min_hold_beats(SectionLabel::Chorus), 4);
    }

    #[test]
    fn unmatched_stems_are_rejected() {
        let (energy, _) = index(&[("drums", &[1.0; 4])]);
        let sections = verse(4.0);
        let videos = BTreeMap::new();
        let err = TimelineSynthesizer::new(&energy, &videos, &sections, params(4.0)).unwrap_err();
        assert!(matches!(err, StemSyncError::NoMatchingStems));
    }

    #[test]
    fn two_active_stems_alternate() {
        let (energy, videos) = index(&[("drums", &[1.0; 10]), ("vocals", &[0.8; 10])]);
        let sections = verse(10.0);
        let p = params(10.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(10), &mut rng());
        assert_eq!(events.len(), 11);
        assert_eq!(events.last().unwrap().time(), 10.0);
        let stems = stems_of(&events[..10]);
        for (i, stem) in stems.iter().enumerate() {
            let expected = if i % 2 == 0 { "vocals" } else { "drums" };
            assert_eq!(*stem, expected, "beat {i}");
        }
    }

    #[test]
    fn loudest_candidate_wins_and_ties_go_to_lower_id() {
        let (energy, videos) = index(&[
            ("bass", &[0.5; 4]),
            ("drums", &[0.9; 4]),
            ("keys", &[0.9; 4]),
        ]);
        let sections = verse(4.0);
        let p = params(4.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(2), &mut rng());
        // Starting on "bass": drums and keys tie, drums sorts first.
        assert_eq!(stems_of(&events)[..2], ["drums", "keys"]);
    }

    #[test]
    fn cooldown_blocks_recent_stems() {
        let (energy, videos) = index(&[
            ("a", &[1.0; 12]),
            ("b", &[0.9; 12]),
            ("c", &[0.8; 12]),
        ]);
        let sections = verse(12.0);
        let mut p = params(12.0);
        p.cooldown = 2.5;
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(12), &mut rng());
        let cuts: Vec<(f64, &str)> = events[..events.len() - 1]
            .iter()
            .filter_map(|e| e.stem().map(|s| (e.time(), s)))
            .collect();
        assert!(!cuts.is_empty());
        for (i, (time, stem)) in cuts.iter().enumerate() {
            for (later, other) in &cuts[i + 1..] {
                if other == stem {
                    assert!(later - time >= 2.5, "{stem} reused at {time} and {later}");
                }
            }
        }
    }

    #[test]
    fn downbeat_bias_restricts_cut_beats() {
        let (energy, videos) = index(&[("drums", &[1.0; 16]), ("vocals", &[0.8; 16])]);
        let sections = verse(16.0);
        let mut p = params(16.0);
        p.downbeat_bias = 4;
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(16), &mut rng());
        let accepted = &events[..events.len() - 1];
        assert_eq!(accepted.len(), 4);
        for event in accepted {
            let TimelineEvent::StemCut(cut) = event else {
                panic!("unexpected event {event:?}");
            };
            assert_eq!(cut.beat_index % 4, 0);
        }
    }

    #[test]
    fn phrase_length_spaces_verse_cuts() {
        let (energy, videos) = index(&[("drums", &[1.0; 12]), ("vocals", &[0.8; 12])]);
        let sections = verse(12.0);
        let mut p = params(12.0);
        p.phrase_beats = 3;
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(12), &mut rng());
        let times: Vec<f64> = events.iter().map(TimelineEvent::time).collect();
        assert_eq!(times, vec![0.0, 3.0, 6.0, 9.0, 12.0]);
    }

    #[test]
    fn aggressive_chorus_cuts_every_beat() {
        let (energy, videos) = index(&[("drums", &[1.0; 8]), ("vocals", &[0.8; 8])]);
        let sections = chorus(8.0);
        let mut p = params(8.0);
        p.phrase_beats = 4;
        p.chorus_aggression = 1.0;
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(8), &mut rng());
        assert_eq!(events.len(), 9);
    }

    #[test]
    fn silence_falls_back_to_another_stem() {
        let (energy, videos) = index(&[("drums", &[0.0; 4]), ("vocals", &[0.0; 4])]);
        let sections = verse(4.0);
        let p = params(4.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(4), &mut rng());
        // Two stems: the fallback has exactly one choice each time.
        assert_eq!(
            stems_of(&events),
            vec!["vocals", "drums", "vocals", "drums", "drums"]
        );
    }

    #[test]
    fn lone_silent_stem_only_closes_the_timeline() {
        let (energy, videos) = index(&[("drums", &[0.0; 4])]);
        let sections = verse(4.0);
        let p = params(4.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(4), &mut rng());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time(), 4.0);
        assert_eq!(events[0].stem(), Some("drums"));
    }

    #[test]
    fn vocal_guard_keeps_vocals_out_of_the_fallback() {
        let (energy, videos) = index(&[
            ("bass", &[0.0; 20]),
            ("drums", &[0.0; 20]),
            ("vocals", &[0.0; 20]),
        ]);
        let sections = verse(20.0);
        let mut p = params(20.0);
        p.vocal_fallback_guard = true;
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(20), &mut rng());
        assert!(stems_of(&events).iter().all(|s| *s != "vocals"));
    }

    #[test]
    fn beats_past_the_song_are_ignored() {
        let (energy, videos) = index(&[("drums", &[1.0; 10]), ("vocals", &[0.8; 10])]);
        let sections = verse(5.0);
        let p = params(5.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&beats(10), &mut rng());
        assert!(events.iter().all(|e| (0.0..=5.0).contains(&e.time())));
        assert_eq!(events.last().unwrap().time(), 5.0);
        assert_eq!(events.len(), 6);
    }

    #[test]
    fn no_beats_still_closes_the_timeline() {
        let (energy, videos) = index(&[("drums", &[1.0; 3])]);
        let sections = verse(3.0);
        let p = params(3.0);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p).unwrap();

        let events = synth.synthesize(&[], &mut rng());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time(), 3.0);
        assert_eq!(events[0].stem(), Some("drums"));
    }

    #[test]
    fn certain_free_clips_follow_the_cycle() {
        let (energy, videos) = index(&[("drums", &[1.0; 6]), ("vocals", &[0.8; 6])]);
        let sections = verse(6.0);
        let mut p = params(6.0);
        p.free_clip_probability = 1.0;
        let cycler = FreeClipCycler::new(vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")]);
        let mut synth = TimelineSynthesizer::new(&energy, &videos, &sections, p)
            .unwrap()
            .with_free_clips(cycler);

        let events = synth.synthesize(&beats(6), &mut rng());
        assert_eq!(events.len(), 7);
        let transforms: Vec<Transforms> = events[..6]
            .iter()
            .map(|event| match event {
                TimelineEvent::FreeClip(cut) => cut.transforms,
                other => panic!("expected a free clip, got {other:?}"),
            })
            .collect();
        let none = Transforms::NONE;
        let flipped = Transforms::MIRROR_REVERSE;
        assert_eq!(transforms, vec![none, none, flipped, flipped, none, none]);
        assert!(matches!(events[6], TimelineEvent::StemCut(_)));
        assert_eq!(events[6].time(), 6.0);
    }
}
