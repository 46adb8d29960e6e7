use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::Envelope;

/// Percentile of a stem's energy below which it counts as silent.
pub const SILENCE_PERCENTILE: f64 = 10.0;
/// Multiplier applied to the silence percentile.
pub const SILENCE_FACTOR: f64 = 1.5;

const VOCAL_MARKERS: [&str; 2] = ["voc", "vox"];

/// Identity of a stem: lower-cased file name without its extension.
pub fn stem_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// True when the stem name suggests a vocal track.
pub fn is_vocal(stem: &str) -> bool {
    VOCAL_MARKERS.iter().any(|marker| stem.contains(marker))
}

/// A stem audio file paired with the video of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemPair {
    pub id: String,
    pub audio: PathBuf,
    pub video: PathBuf,
}

/// Pairs audio stems with videos by identical stem id, ordered by id.
/// Audio files without a matching video are dropped.
pub fn match_stems(audio: &[PathBuf], videos: &[PathBuf]) -> Vec<StemPair> {
    let videos: BTreeMap<String, &PathBuf> =
        videos.iter().map(|path| (stem_id(path), path)).collect();
    let mut pairs: BTreeMap<String, StemPair> = BTreeMap::new();
    for path in audio {
        let id = stem_id(path);
        if let Some(video) = videos.get(&id) {
            pairs.insert(
                id.clone(),
                StemPair {
                    id,
                    audio: path.clone(),
                    video: (*video).clone(),
                },
            );
        }
    }
    pairs.into_values().collect()
}

/// Energy profile of one stem, fixed for the duration of a render.
#[derive(Debug, Clone)]
pub struct StemAudioAnalysis {
    pub envelope: Envelope,
    /// Energy at or below this value counts as silence.
    pub silence: f64,
}

impl StemAudioAnalysis {
    pub fn new(envelope: Envelope) -> Self {
        let silence = envelope.percentile(SILENCE_PERCENTILE) * SILENCE_FACTOR;
        Self { envelope, silence }
    }

    pub fn duration(&self) -> f64 {
        self.envelope.duration
    }

    /// Interpolated energy at `time`; zero past the end of the stem.
    pub fn energy_at(&self, time: f64) -> f64 {
        if time > self.envelope.duration {
            0.0
        } else {
            self.envelope.interpolate(time)
        }
    }
}

/// Stem energy snapshot at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemLevel<'a> {
    pub stem: &'a str,
    pub energy: f64,
    pub active: bool,
}

/// Per-stem energy lookup, iterated in ascending stem id order.
#[derive(Debug, Clone, Default)]
pub struct StemEnergyIndex {
    stems: BTreeMap<String, StemAudioAnalysis>,
}

impl StemEnergyIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the analysis for `stem`.
    pub fn insert(&mut self, stem: impl Into<String>, analysis: StemAudioAnalysis) {
        self.stems.insert(stem.into(), analysis);
    }

    /// Number of indexed stems.
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    /// True before any stem is inserted.
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Stem ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.stems.keys().map(String::as_str)
    }

    /// Energy and activity of every stem at `time`.
    pub fn levels_at(&self, time: f64) -> Vec<StemLevel<'_>> {
        self.stems
            .iter()
            .map(|(stem, analysis)| {
                let energy = analysis.energy_at(time);
                StemLevel {
                    stem,
                    energy,
                    active: energy > analysis.silence,
                }
            })
            .collect()
    }
}

impl FromIterator<(String, StemAudioAnalysis)> for StemEnergyIndex {
    fn from_iter<I: IntoIterator<Item = (String, StemAudioAnalysis)>>(iter: I) -> Self {
        Self {
            stems: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(values: Vec<f32>) -> Envelope {
        Envelope {
            times: (0..values.len()).map(|i| i as f64).collect(),
            duration: (values.len() - 1) as f64,
            values,
        }
    }

    #[test]
    fn stem_identity_ignores_case_and_extension() {
        assert_eq!(stem_id(Path::new("/music/Drums.WAV")), "drums");
        assert_eq!(stem_id(Path::new("lead.vocals.mp4")), "lead.vocals");
    }

    #[test]
    fn recognises_vocal_stems() {
        assert!(is_vocal("vocals"));
        assert!(is_vocal("leadvox"));
        assert!(!is_vocal("drums"));
    }

    #[test]
    fn matches_only_identical_names() {
        let audio = vec![
            PathBuf::from("a/Vocals.wav"),
            PathBuf::from("a/drums.wav"),
            PathBuf::from("a/bass.wav"),
        ];
        let videos = vec![
            PathBuf::from("v/drums.mp4"),
            PathBuf::from("v/vocals.MOV"),
            PathBuf::from("v/bass_take2.mp4"),
        ];

        let pairs = match_stems(&audio, &videos);
        let ids: Vec<_> = pairs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["drums", "vocals"]);
        assert_eq!(pairs[1].video, PathBuf::from("v/vocals.MOV"));
    }

    #[test]
    fn silence_threshold_tracks_low_percentile() {
        let analysis = StemAudioAnalysis::new(envelope(vec![
            0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0,
        ]));
        // 10th percentile of 0.0..=1.0 is 0.1.
        assert!((analysis.silence - 0.15).abs() < 1e-6);
    }

    #[test]
    fn energy_is_zero_past_the_stem_end() {
        let analysis = StemAudioAnalysis::new(envelope(vec![1.0, 1.0, 1.0]));
        assert_eq!(analysis.energy_at(1.5), 1.0);
        assert_eq!(analysis.energy_at(2.5), 0.0);
    }

    #[test]
    fn levels_flag_active_stems() {
        let mut index = StemEnergyIndex::new();
        let drums = envelope(vec![0.0, 0.0, 1.0, 1.0]);
        let bass = envelope(vec![0.5, 0.5, 0.5, 0.5]);
        index.insert("drums", StemAudioAnalysis::new(drums));
        index.insert("bass", StemAudioAnalysis::new(bass));

        let levels = index.levels_at(2.0);
        assert_eq!(levels[0].stem, "bass");
        assert!(!levels[0].active, "flat stem never exceeds its own floor");
        assert!(levels[1].active);
        assert_eq!(levels[1].energy, 1.0);
    }

    #[test]
    fn reinserting_a_stem_replaces_it() {
        let mut index = StemEnergyIndex::new();
        assert!(index.is_empty());
        index.insert("vocals", StemAudioAnalysis::new(envelope(vec![0.2; 3])));
        index.insert("drums", StemAudioAnalysis::new(envelope(vec![0.2; 3])));
        index.insert("vocals", StemAudioAnalysis::new(envelope(vec![0.9; 3])));

        assert_eq!(index.len(), 2);
        assert_eq!(index.ids().collect::<Vec<_>>(), vec!["drums", "vocals"]);
        assert!((index.levels_at(1.0)[1].energy - 0.9).abs() < 1e-6);
    }
}
