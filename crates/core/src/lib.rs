//! Core library for the Stem Sync video editor.
//!
//! Given isolated stem recordings, a video per stem and the final mix, the
//! crate decides beat by beat which stem's video is on screen and assembles
//! the result. Feature extraction and media encoding sit behind the
//! [`AudioFeatures`] and [`MediaCodec`] traits; everything between them is
//! plain data and deterministic for a given random source.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod beats;
pub mod config;
pub mod cycler;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod render;
pub mod sections;
pub mod stems;
pub mod summary;
pub mod timeline;

pub use assets::{BookendAssets, OutputAllocator, SequentialAllocator};
pub use audio::{AudioFeatures, Envelope, Rhythm, SpectralAnalyzer, Waveform};
pub use beats::{next_beat_after, snap_beats};
pub use config::{RenderConfig, RenderInputs};
pub use cycler::{CyclePhase, FreeClipCycler, Transforms};
pub use error::{Result, StemSyncError};
pub use pipeline::{Analysis, Pipeline, RenderReport};
pub use record::{EncodeJob, FfmpegCodec, MediaCodec, RecordingSettings};
pub use render::{Assembler, Clip, Segment};
pub use sections::{Section, SectionLabel, SectionMap};
pub use stems::{match_stems, StemAudioAnalysis, StemEnergyIndex, StemPair};
pub use summary::{summarize, write_summary, EditSummaryRecord};
pub use timeline::{inject_bookends, BookendPlan, TimelineEvent, TimelineSynthesizer};
