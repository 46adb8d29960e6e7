//! One render from input files to a muxed video and its edit summary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assets::{BookendAssets, OutputAllocator, SequentialAllocator};
use crate::audio::AudioFeatures;
use crate::beats::snap_beats;
use crate::record::MediaCodec;
use crate::render::{Assembler, Segment};
use crate::stems::{match_stems, StemAudioAnalysis, StemEnergyIndex};
use crate::summary::write_summary;
use crate::timeline::{inject_bookends, SynthesisParams, TimelineEvent, TimelineSynthesizer};
use crate::{FreeClipCycler, RenderConfig, RenderInputs, Result, Section, SectionMap, StemSyncError};

/// Song-level features of the final mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub song_length: f64,
    /// Beats after snapping to nearby onsets.
    pub beats: Vec<f64>,
    pub sections: Vec<Section>,
}

impl Analysis {
    pub fn section_map(&self) -> SectionMap {
        SectionMap::from_sections(self.sections.clone())
    }
}

/// What a finished render produced.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub output: PathBuf,
    pub summary_path: PathBuf,
    pub events: Vec<TimelineEvent>,
    pub segments: Vec<Segment>,
}

pub struct Pipeline<F: AudioFeatures, C: MediaCodec> {
    features: F,
    codec: C,
    config: RenderConfig,
    bookends: BookendAssets,
    allocator: Box<dyn OutputAllocator>,
}

impl<F: AudioFeatures, C: MediaCodec> Pipeline<F, C> {
    /// Pipeline without bookends that writes into `output/`.
    pub fn new(features: F, codec: C, config: RenderConfig) -> Self {
        Self {
            features,
            codec,
            config,
            bookends: BookendAssets::default(),
            allocator: Box::new(SequentialAllocator::new("output")),
        }
    }

    pub fn with_bookends(mut self, bookends: BookendAssets) -> Self {
        self.bookends = bookends;
        self
    }

    pub fn with_allocator(mut self, allocator: impl OutputAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Song length, snapped beats and sections of `audio`.
    pub fn analyze(&self, audio: &Path) -> Result<Analysis> {
        let envelope = self.features.envelope(audio)?;
        let rhythm = self.features.rhythm(audio)?;
        let beats = snap_beats(&rhythm.beats, &rhythm.onsets, self.config.snap_window);
        let sections = SectionMap::segment(&envelope);
        debug!(
            beats = beats.len(),
            sections = sections.sections().len(),
            duration = envelope.duration,
            "analysed final mix"
        );
        Ok(Analysis {
            song_length: envelope.duration,
            beats,
            sections: sections.sections().to_vec(),
        })
    }

    /// Runs a full render. Configuration problems are reported before any
    /// media is touched.
    pub fn render<R: Rng + ?Sized>(
        &self,
        inputs: &RenderInputs,
        rng: &mut R,
    ) -> Result<RenderReport> {
        self.config.validate()?;
        let final_audio = inputs
            .final_audio
            .as_deref()
            .ok_or_else(|| StemSyncError::config("no final audio supplied"))?;

        let pairs = match_stems(&inputs.stem_audio, &inputs.stem_videos);
        if pairs.is_empty() {
            return Err(StemSyncError::NoMatchingStems);
        }
        if pairs.len() < inputs.stem_audio.len() {
            warn!(
                matched = pairs.len(),
                supplied = inputs.stem_audio.len(),
                "some stems have no matching video"
            );
        }

        let output = match &inputs.output {
            Some(path) => path.clone(),
            None => self.allocator.allocate()?,
        };
        info!(output = %output.display(), stems = pairs.len(), "starting render");

        let analysis = self.analyze(final_audio)?;
        let song_length = analysis.song_length;
        let sections = analysis.section_map();

        let mut energy = StemEnergyIndex::new();
        for pair in &pairs {
            let envelope = self.features.envelope(&pair.audio)?;
            energy.insert(pair.id.clone(), StemAudioAnalysis::new(envelope));
        }
        debug!(stems = energy.len(), "stem energy index built");
        let videos: BTreeMap<String, PathBuf> = pairs
            .into_iter()
            .map(|pair| (pair.id, pair.video))
            .collect();

        let params = SynthesisParams::from_config(&self.config, song_length);
        let mut synthesizer = TimelineSynthesizer::new(&energy, &videos, &sections, params)?
            .with_free_clips(FreeClipCycler::new(inputs.free_clips.clone()));
        let events = synthesizer.synthesize(&analysis.beats, rng);
        let events = inject_bookends(
            events,
            &analysis.beats,
            song_length,
            &self.bookends.plan(&self.config),
        );
        info!(events = events.len(), song_length, "timeline ready");

        let segments = Assembler::new(&self.codec, &videos, song_length)?.render(
            &events,
            final_audio,
            song_length,
            &output,
        )?;
        let summary_path = write_summary(&events, &output)?;
        info!(output = %output.display(), summary = %summary_path.display(), "render complete");

        Ok(RenderReport {
            output,
            summary_path,
            events,
            segments,
        })
    }
}
