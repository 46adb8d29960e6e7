use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Visual transforms applied to a free clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transforms {
    pub mirror: bool,
    pub reverse: bool,
}

impl Transforms {
    pub const NONE: Self = Self {
        mirror: false,
        reverse: false,
    };
    pub const MIRROR_REVERSE: Self = Self {
        mirror: true,
        reverse: true,
    };

    /// True when the clip plays as recorded.
    pub fn is_empty(&self) -> bool {
        !self.mirror && !self.reverse
    }
}

/// Which pass through the clip pool the cycler is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    /// Clips play as recorded.
    #[default]
    Forward,
    /// Clips play mirrored and reversed.
    MirroredReversed,
}

impl CyclePhase {
    pub fn transforms(self) -> Transforms {
        match self {
            Self::Forward => Transforms::NONE,
            Self::MirroredReversed => Transforms::MIRROR_REVERSE,
        }
    }

    fn toggled(self) -> Self {
        match self {
            Self::Forward => Self::MirroredReversed,
            Self::MirroredReversed => Self::Forward,
        }
    }
}

/// Hands out B-roll clips in order: one untouched pass through the pool,
/// then one mirrored-and-reversed pass, repeating.
#[derive(Debug, Clone)]
pub struct FreeClipCycler {
    clips: Vec<PathBuf>,
    index: usize,
    phase: CyclePhase,
}

impl FreeClipCycler {
    /// Returns `None` for an empty pool.
    pub fn new(clips: Vec<PathBuf>) -> Option<Self> {
        if clips.is_empty() {
            return None;
        }
        Some(Self {
            clips,
            index: 0,
            phase: CyclePhase::Forward,
        })
    }

    /// Position of the clip the next [`advance`](Self::advance) returns.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current pass through the pool.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Returns the next clip and its transforms, then advances.
    pub fn advance(&mut self) -> (&Path, Transforms) {
        let current = self.index;
        let transforms = self.phase.transforms();

        self.index += 1;
        if self.index >= self.clips.len() {
            self.index = 0;
            self.phase = self.phase.toggled();
        }

        (&self.clips[current], transforms)
    }
}
