use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{RecordingSettings, Result, StemSyncError};

/// Options recognised by a single render invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Maximum distance in seconds a beat may move toward an onset.
    pub snap_window: f64,
    /// How much shorter chorus shots may be than verse shots, in [0, 1].
    pub chorus_aggression: f64,
    /// Minimum beats a shot holds outside a chorus.
    pub phrase_beats: u32,
    /// Restrict cuts to every N beats; 0 disables.
    pub downbeat_bias: u32,
    /// Seconds before a stem may be selected again.
    pub cooldown: f64,
    /// Chance that a cut shows a free clip instead of the chosen stem.
    pub free_clip_probability: f64,
    pub intro_min: f64,
    pub outro_min: f64,
    /// Seed for the random source. A fresh seed is drawn when absent.
    pub seed: Option<u64>,
    /// Keep vocal stems out of the silent-passage fallback pick.
    pub vocal_fallback_guard: bool,
    pub recording: RecordingSettings,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            snap_window: 0.08,
            chorus_aggression: 0.5,
            phrase_beats: 4,
            downbeat_bias: 0,
            cooldown: 3.0,
            free_clip_probability: 0.2,
            intro_min: 3.0,
            outro_min: 3.0,
            seed: None,
            vocal_fallback_guard: false,
            recording: RecordingSettings::default(),
        }
    }
}

impl RenderConfig {
    /// Loads a configuration from a JSON document. Missing fields keep
    /// their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Checks every option against its documented range.
    pub fn validate(&self) -> Result<()> {
        check_range("snap_window", self.snap_window, 0.02, 0.15)?;
        check_range("chorus_aggression", self.chorus_aggression, 0.0, 1.0)?;
        check_range("phrase_beats", f64::from(self.phrase_beats), 1.0, 8.0)?;
        check_range("downbeat_bias", f64::from(self.downbeat_bias), 0.0, 8.0)?;
        check_range("cooldown", self.cooldown, 0.0, 10.0)?;
        check_range(
            "free_clip_probability",
            self.free_clip_probability,
            0.0,
            1.0,
        )?;
        check_range("intro_min", self.intro_min, 0.0, 10.0)?;
        check_range("outro_min", self.outro_min, 0.0, 10.0)?;
        if self.recording.fps == 0 {
            return Err(StemSyncError::config("recording fps must be positive"));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(StemSyncError::config(format!(
            "`{name}` = {value} is outside [{min}, {max}]"
        )))
    }
}

/// Files taking part in one render.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderInputs {
    pub stem_audio: Vec<PathBuf>,
    pub stem_videos: Vec<PathBuf>,
    #[serde(default)]
    pub free_clips: Vec<PathBuf>,
    pub final_audio: Option<PathBuf>,
    /// Explicit output path; allocated automatically when absent.
    pub output: Option<PathBuf>,
}
