//! Assembly: turns timeline cut points into a gap-free list of clips.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::record::{EncodeJob, MediaCodec};
use crate::timeline::TimelineEvent;
use crate::{Result, StemSyncError};

mod clip;

pub use clip::{Clip, Piece};

/// Leading seconds of every source that are never shown; first frames of
/// many encodes do not decode cleanly.
pub const SAFE_START: f64 = 0.05;
/// Shortest segment ever emitted.
const MIN_SEGMENT: f64 = 0.001;

/// Stabilisation hook on the normalisation path. Returns the input as-is.
pub fn stabilize(path: &Path) -> PathBuf {
    path.to_path_buf()
}

/// Trims or loops a stem video so that it covers the whole song, skipping
/// the first [`SAFE_START`] seconds.
pub fn normalize_source(path: &Path, raw_duration: f64, song_length: f64) -> Result<Clip> {
    if raw_duration <= SAFE_START {
        return Err(StemSyncError::SourceTooShort {
            path: path.to_path_buf(),
            duration: raw_duration,
        });
    }

    let source = Clip::source(stabilize(path), raw_duration);
    let span = song_length + SAFE_START;
    if raw_duration >= span {
        return Ok(source.subclip(SAFE_START, span));
    }

    let loops = (span / raw_duration).ceil() as usize;
    Ok(source.looped(loops).subclip(SAFE_START, span))
}

/// Covers `duration` seconds with `source`: a plain cut when it is long
/// enough, otherwise the usable part played forward then backward, repeated
/// as often as needed.
pub fn stretch(source: Clip, duration: f64) -> Result<Clip> {
    let length = source.duration();
    if duration <= length {
        return Ok(source.subclip(0.0, duration));
    }
    if length <= SAFE_START {
        let path = source
            .sources()
            .first()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        return Err(StemSyncError::SourceTooShort {
            path,
            duration: length,
        });
    }

    let forward = source.subclip(SAFE_START, length);
    let round_trip = 2.0 * forward.duration();
    let trips = (duration / round_trip).ceil().max(1.0) as usize;
    let mut parts = Vec::with_capacity(trips * 2);
    for _ in 0..trips {
        parts.push(forward.clone());
        parts.push(forward.clone().reversed());
    }
    Ok(Clip::Concat(parts).subclip(0.0, duration))
}

/// One rendered interval of the final video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Stem id or clip file name.
    pub source: String,
    pub timeline_start: f64,
    pub timeline_end: f64,
    /// Where the read starts within the (normalised) source.
    pub source_start: f64,
    pub clip: Clip,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.clip.duration()
    }
}

/// Free-clip and bookend sources probed during one render, one probe per
/// distinct path. The cache lives exactly as long as its [`Assembler`].
struct SourceCache<'c, C: MediaCodec> {
    codec: &'c C,
    sources: HashMap<PathBuf, Clip>,
}

impl<'c, C: MediaCodec> SourceCache<'c, C> {
    fn new(codec: &'c C) -> Self {
        Self {
            codec,
            sources: HashMap::new(),
        }
    }

    fn open(&mut self, path: &Path) -> Result<Clip> {
        if let Some(clip) = self.sources.get(path) {
            return Ok(clip.clone());
        }
        let duration = self.codec.probe_duration(path)?;
        let clip = Clip::source(path, duration);
        self.sources.insert(path.to_path_buf(), clip.clone());
        Ok(clip)
    }
}

impl<C: MediaCodec> Drop for SourceCache<'_, C> {
    fn drop(&mut self) {
        if !self.sources.is_empty() {
            debug!(count = self.sources.len(), "cleared per-render clip cache");
        }
    }
}

/// Builds segments from an ordered timeline and hands them to the codec.
pub struct Assembler<'c, C: MediaCodec> {
    stems: BTreeMap<String, Clip>,
    cache: SourceCache<'c, C>,
}

impl<'c, C: MediaCodec> Assembler<'c, C> {
    /// Probes and normalises every stem video up front.
    pub fn new(
        codec: &'c C,
        videos: &BTreeMap<String, PathBuf>,
        song_length: f64,
    ) -> Result<Self> {
        let mut stems = BTreeMap::new();
        for (stem, path) in videos {
            let raw = codec.probe_duration(path)?;
            stems.insert(stem.clone(), normalize_source(path, raw, song_length)?);
        }
        Ok(Self {
            stems,
            cache: SourceCache::new(codec),
        })
    }

    /// Converts cut points into consecutive segments starting at zero.
    pub fn build_segments(&mut self, events: &[TimelineEvent]) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut cursor = 0.0_f64;

        for event in events {
            let end = event.effective_end();

            if let TimelineEvent::Intro(bookend) | TimelineEvent::Outro(bookend) = event {
                let duration = end - cursor;
                if duration <= 0.0 {
                    warn!(
                        clip = ?bookend.clip,
                        cursor,
                        end,
                        "bookend does not stand alone, skipping"
                    );
                    continue;
                }
                let source = self.cache.open(&bookend.clip)?;
                segments.push(Segment {
                    source: file_label(&bookend.clip),
                    timeline_start: cursor,
                    timeline_end: end,
                    source_start: 0.0,
                    clip: stretch(source, duration)?,
                });
                cursor = end;
                continue;
            }

            if end <= cursor {
                continue;
            }
            let clip_start = cursor.max(SAFE_START);
            let clip_end = end.max(clip_start + MIN_SEGMENT);

            let segment = match event {
                TimelineEvent::FreeClip(cut) => {
                    let source = self.cache.open(&cut.clip)?;
                    let mut clip = stretch(source, clip_end - clip_start)?;
                    if cut.transforms.mirror {
                        clip = clip.mirrored();
                    }
                    if cut.transforms.reverse {
                        clip = clip.reversed();
                    }
                    Segment {
                        source: file_label(&cut.clip),
                        timeline_start: cursor,
                        timeline_end: end,
                        source_start: 0.0,
                        clip,
                    }
                }
                TimelineEvent::StemCut(cut) => {
                    let normalised = self.stems.get(&cut.stem).ok_or_else(|| {
                        StemSyncError::msg(format!("no video for stem `{}`", cut.stem))
                    })?;
                    Segment {
                        source: cut.stem.clone(),
                        timeline_start: cursor,
                        timeline_end: end,
                        source_start: clip_start,
                        clip: normalised.clone().subclip(clip_start, clip_end),
                    }
                }
                TimelineEvent::Intro(_) | TimelineEvent::Outro(_) => continue,
            };
            segments.push(segment);
            cursor = end;
        }

        Ok(segments)
    }

    /// Builds the segments and encodes them against `audio`. The per-render
    /// clip cache is dropped with the assembler on every path.
    pub fn render(
        mut self,
        events: &[TimelineEvent],
        audio: &Path,
        audio_duration: f64,
        output: &Path,
    ) -> Result<Vec<Segment>> {
        let segments = self.build_segments(events)?;
        if segments.is_empty() {
            return Err(StemSyncError::AssemblyEmpty);
        }

        let clips: Vec<Clip> = segments.iter().map(|s| s.clip.clone()).collect();
        info!(segments = clips.len(), "assembled timeline");
        self.cache.codec.encode(&EncodeJob {
            segments: &clips,
            audio,
            duration: audio_duration,
            output,
        })?;
        Ok(segments)
    }
}

/// File name of a clip for human-readable labels.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::timeline::{Bookend, FreeClipCut, StemCut};
    use crate::{SectionLabel, Transforms};

    #[derive(Default)]
    struct FakeCodec {
        durations: HashMap<PathBuf, f64>,
        probes: RefCell<Vec<PathBuf>>,
        encoded: RefCell<Vec<(usize, f64)>>,
    }

    impl FakeCodec {
        fn with(durations: &[(&str, f64)]) -> Self {
            Self {
                durations: durations
                    .iter()
                    .map(|(p, d)| (PathBuf::from(p), *d))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl MediaCodec for FakeCodec {
        fn probe_duration(&self, path: &Path) -> Result<f64> {
            self.probes.borrow_mut().push(path.to_path_buf());
            self.durations
                .get(path)
                .copied()
                .ok_or_else(|| StemSyncError::msg(format!("cannot open {}", path.display())))
        }

        fn encode(&self, job: &EncodeJob<'_>) -> Result<()> {
            self.encoded
                .borrow_mut()
                .push((job.segments.len(), job.duration));
            Ok(())
        }
    }

    fn videos() -> BTreeMap<String, PathBuf> {
        [("drums", "drums.mp4"), ("vocals", "vocals.mp4")]
            .into_iter()
            .map(|(s, p)| (s.to_string(), PathBuf::from(p)))
            .collect()
    }

    fn stem(time: f64, stem: &str) -> TimelineEvent {
        TimelineEvent::StemCut(StemCut {
            time,
            stem: stem.to_string(),
            beat_index: 0,
            section: SectionLabel::Verse,
        })
    }

    fn free(time: f64, clip: &str, transforms: Transforms) -> TimelineEvent {
        TimelineEvent::FreeClip(FreeClipCut {
            start: time,
            end: None,
            clip: PathBuf::from(clip),
            transforms,
            beat_index: 0,
            section: SectionLabel::Verse,
        })
    }

    #[test]
    fn long_sources_are_trimmed_after_the_safe_offset() {
        let clip = normalize_source(Path::new("a.mp4"), 30.0, 10.0).unwrap();
        assert_abs_diff_eq!(clip.duration(), 10.0, epsilon = 1e-9);
        let pieces = clip.pieces();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].offset, SAFE_START);
    }

    #[test]
    fn short_sources_are_looped() {
        let clip = normalize_source(Path::new("a.mp4"), 4.0, 10.0).unwrap();
        assert_abs_diff_eq!(clip.duration(), 10.0, epsilon = 1e-9);
        let pieces = clip.pieces();
        assert_eq!(pieces.len(), 3);
        assert_abs_diff_eq!(
            pieces.iter().map(|p| p.duration).sum::<f64>(),
            10.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn unusable_sources_are_rejected() {
        let err = normalize_source(Path::new("blip.mp4"), 0.04, 10.0).unwrap_err();
        assert!(matches!(err, StemSyncError::SourceTooShort { .. }));
    }

    #[test]
    fn stretch_ping_pongs_short_clips() {
        let clip = stretch(Clip::source("b.mp4", 2.05), 5.0).unwrap();
        assert_abs_diff_eq!(clip.duration(), 5.0, epsilon = 1e-9);
        let flags: Vec<bool> = clip.pieces().iter().map(|p| p.reversed).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn stretch_cuts_long_clips_from_zero() {
        let clip = stretch(Clip::source("b.mp4", 8.0), 3.0).unwrap();
        let pieces = clip.pieces();
        assert_eq!((pieces[0].offset, pieces[0].duration), (0.0, 3.0));
    }

    #[test]
    fn segments_cover_the_song_without_gaps() {
        let codec = FakeCodec::with(&[
            ("drums.mp4", 4.0),
            ("vocals.mp4", 25.0),
            ("broll.mp4", 1.0),
        ]);
        let mut assembler = Assembler::new(&codec, &videos(), 10.0).unwrap();
        let events = vec![
            stem(0.0, "drums"),
            stem(2.0, "vocals"),
            free(4.0, "broll.mp4", Transforms::MIRROR_REVERSE),
            stem(7.0, "drums"),
            stem(10.0, "vocals"),
        ];

        let segments = assembler.build_segments(&events).unwrap();
        let sources: Vec<&str> = segments.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["vocals", "broll.mp4", "drums", "vocals"]);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].timeline_end, pair[1].timeline_start);
        }
        assert!(segments.iter().all(|s| s.duration() > 0.0));
        for segment in segments.iter().filter(|s| s.source != "broll.mp4") {
            assert!(segment.source_start >= SAFE_START);
        }

        // Only the opening read is clamped to the safe offset, so the
        // whole edit runs exactly that much short of the song.
        assert_abs_diff_eq!(segments[0].duration(), 2.0 - SAFE_START, epsilon = 1e-9);
        assert_abs_diff_eq!(segments[2].duration(), 3.0, epsilon = 1e-9);
        let total: f64 = segments.iter().map(Segment::duration).sum();
        assert_abs_diff_eq!(total, 10.0 - SAFE_START, epsilon = 1e-9);
    }

    #[test]
    fn free_clip_transforms_wrap_the_stretched_clip() {
        let codec = FakeCodec::with(&[
            ("drums.mp4", 20.0),
            ("vocals.mp4", 20.0),
            ("broll.mp4", 1.0),
        ]);
        let mut assembler = Assembler::new(&codec, &videos(), 10.0).unwrap();
        let events = vec![
            stem(2.0, "vocals"),
            free(4.0, "broll.mp4", Transforms::MIRROR_REVERSE),
            stem(10.0, "drums"),
        ];

        let segments = assembler.build_segments(&events).unwrap();
        let broll = segments
            .iter()
            .find(|s| s.source == "broll.mp4")
            .unwrap();
        assert_eq!((broll.timeline_start, broll.timeline_end), (2.0, 4.0));
        assert_abs_diff_eq!(broll.duration(), 2.0, epsilon = 1e-9);

        let source = Clip::source("broll.mp4", 1.0);
        let plain = stretch(source, 2.0).unwrap().pieces();
        let pieces = broll.clip.pieces();
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.mirrored));
        let flipped: Vec<bool> = plain.iter().rev().map(|p| !p.reversed).collect();
        let reversed: Vec<bool> = pieces.iter().map(|p| p.reversed).collect();
        assert_eq!(reversed, flipped);
        assert_eq!(reversed, vec![true, false, true]);
    }

    #[test]
    fn free_clip_sources_are_opened_once() {
        let codec = FakeCodec::with(&[
            ("drums.mp4", 20.0),
            ("vocals.mp4", 20.0),
            ("broll.mp4", 5.0),
        ]);
        let mut assembler = Assembler::new(&codec, &videos(), 10.0).unwrap();
        let events = vec![
            free(1.0, "broll.mp4", Transforms::NONE),
            free(2.0, "broll.mp4", Transforms::MIRROR_REVERSE),
            stem(10.0, "drums"),
        ];
        assembler.build_segments(&events).unwrap();

        let probes = codec.probes.borrow();
        let broll_probes = probes.iter().filter(|p| p.ends_with("broll.mp4")).count();
        assert_eq!(broll_probes, 1);
    }

    #[test]
    fn bookends_start_at_the_cursor() {
        let codec = FakeCodec::with(&[
            ("drums.mp4", 20.0),
            ("vocals.mp4", 20.0),
            ("intro.mp4", 10.0),
            ("outro.mp4", 10.0),
        ]);
        let mut assembler = Assembler::new(&codec, &videos(), 10.0).unwrap();
        let events = vec![
            TimelineEvent::Intro(Bookend {
                start: 0.0,
                end: 3.0,
                clip: PathBuf::from("intro.mp4"),
            }),
            stem(5.0, "drums"),
            TimelineEvent::Outro(Bookend {
                start: 7.0,
                end: 10.0,
                clip: PathBuf::from("outro.mp4"),
            }),
            stem(10.0, "vocals"),
        ];

        let segments = assembler.build_segments(&events).unwrap();
        let spans: Vec<(&str, f64, f64)> = segments
            .iter()
            .map(|s| (s.source.as_str(), s.timeline_start, s.timeline_end))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("intro.mp4", 0.0, 3.0),
                ("drums", 3.0, 5.0),
                ("outro.mp4", 5.0, 10.0),
            ]
        );
        assert_abs_diff_eq!(segments[2].duration(), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn render_encodes_against_the_audio_duration() {
        let codec = FakeCodec::with(&[("drums.mp4", 20.0), ("vocals.mp4", 20.0)]);
        let assembler = Assembler::new(&codec, &videos(), 4.0).unwrap();
        let events = vec![stem(2.0, "drums"), stem(4.0, "vocals")];

        let segments = assembler
            .render(&events, Path::new("mix.wav"), 4.02, Path::new("out.mp4"))
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(*codec.encoded.borrow(), vec![(2, 4.02)]);
    }

    #[test]
    fn empty_timeline_is_an_assembly_error() {
        let codec = FakeCodec::with(&[("drums.mp4", 20.0), ("vocals.mp4", 20.0)]);
        let assembler = Assembler::new(&codec, &videos(), 4.0).unwrap();
        let err = assembler
            .render(&[], Path::new("mix.wav"), 4.0, Path::new("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, StemSyncError::AssemblyEmpty));
        assert!(codec.encoded.borrow().is_empty());
    }

    #[test]
    fn short_stem_video_aborts_before_assembly() {
        let codec = FakeCodec::with(&[("drums.mp4", 0.02), ("vocals.mp4", 20.0)]);
        let err = Assembler::new(&codec, &videos(), 4.0).err().unwrap();
        assert!(matches!(err, StemSyncError::SourceTooShort { .. }));
    }
}
