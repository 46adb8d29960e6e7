use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Reads shorter than this are dropped when lowering.
const MIN_PIECE: f64 = 1e-6;

/// Declarative video composition. Building a clip never touches the media;
/// the codec decides how to realise it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clip {
    /// A whole video file.
    Source { path: PathBuf, duration: f64 },
    /// `[start, end)` of the inner clip.
    Subclip {
        inner: Box<Clip>,
        start: f64,
        end: f64,
    },
    /// Clips played back to back.
    Concat(Vec<Clip>),
    /// Inner clip played backwards.
    Reverse(Box<Clip>),
    /// Inner clip flipped horizontally.
    Mirror(Box<Clip>),
}

/// Contiguous read from one file, after all composition is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub path: PathBuf,
    /// Seconds into the file where the read starts.
    pub offset: f64,
    pub duration: f64,
    pub reversed: bool,
    pub mirrored: bool,
}

impl Clip {
    pub fn source(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self::Source {
            path: path.into(),
            duration,
        }
    }

    pub fn duration(&self) -> f64 {
        match self {
            Self::Source { duration, .. } => *duration,
            Self::Subclip { start, end, .. } => (end - start).max(0.0),
            Self::Concat(clips) => clips.iter().map(Clip::duration).sum(),
            Self::Reverse(inner) | Self::Mirror(inner) => inner.duration(),
        }
    }

    pub fn subclip(self, start: f64, end: f64) -> Self {
        Self::Subclip {
            inner: Box::new(self),
            start,
            end,
        }
    }

    /// The clip repeated `times` times.
    pub fn looped(self, times: usize) -> Self {
        Self::Concat(vec![self; times.max(1)])
    }

    pub fn reversed(self) -> Self {
        Self::Reverse(Box::new(self))
    }

    pub fn mirrored(self) -> Self {
        Self::Mirror(Box::new(self))
    }

    /// Files referenced anywhere in the clip.
    pub fn sources(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.collect_sources(&mut out);
        out
    }

    fn collect_sources<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Self::Source { path, .. } => {
                if !out.contains(&path.as_path()) {
                    out.push(path);
                }
            }
            Self::Subclip { inner, .. } | Self::Reverse(inner) | Self::Mirror(inner) => {
                inner.collect_sources(out)
            }
            Self::Concat(clips) => clips.iter().for_each(|c| c.collect_sources(out)),
        }
    }

    /// Flattens the composition into file reads in playback order.
    pub fn pieces(&self) -> Vec<Piece> {
        let mut out = Vec::new();
        self.read(0.0, self.duration(), &mut out);
        out
    }

    fn read(&self, start: f64, end: f64, out: &mut Vec<Piece>) {
        let start = start.max(0.0);
        if end - start < MIN_PIECE {
            return;
        }

        match self {
            Self::Source { path, .. } => out.push(Piece {
                path: path.clone(),
                offset: start,
                duration: end - start,
                reversed: false,
                mirrored: false,
            }),
            Self::Subclip {
                inner,
                start: from,
                ..
            } => inner.read(from + start, from + end, out),
            Self::Concat(clips) => {
                let mut offset = 0.0;
                let last = clips.len().saturating_sub(1);
                for (index, clip) in clips.iter().enumerate() {
                    let length = clip.duration();
                    // Reads running past the end stay with the last clip.
                    let clip_end = if index == last {
                        f64::INFINITY
                    } else {
                        offset + length
                    };
                    let lo = start.max(offset);
                    let hi = end.min(clip_end);
                    if hi > lo {
                        clip.read(lo - offset, hi - offset, out);
                    }
                    offset += length;
                    if offset >= end {
                        break;
                    }
                }
            }
            Self::Reverse(inner) => {
                let length = inner.duration();
                let mut inner_pieces = Vec::new();
                inner.read(length - end, length - start, &mut inner_pieces);
                out.extend(inner_pieces.into_iter().rev().map(|mut piece| {
                    piece.reversed = !piece.reversed;
                    piece
                }));
            }
            Self::Mirror(inner) => {
                let before = out.len();
                inner.read(start, end, out);
                for piece in &mut out[before..] {
                    piece.mirrored = !piece.mirrored;
                }
            }
        }
    }
}
