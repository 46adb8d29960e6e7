use std::path::{Path, PathBuf};

use tracing::debug;

use crate::timeline::BookendPlan;
use crate::{RenderConfig, Result};

pub const INTRO_FILE: &str = "intro.mp4";
pub const OUTRO_FILE: &str = "outro.mp4";

/// Optional fixed intro and outro clips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookendAssets {
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
}

impl BookendAssets {
    /// Looks for `intro.mp4` and `outro.mp4` in `dir`. Missing files leave
    /// the corresponding bookend disabled.
    pub fn discover(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let find = |name: &str| {
            let path = dir.join(name);
            path.is_file().then_some(path)
        };
        let assets = Self {
            intro: find(INTRO_FILE),
            outro: find(OUTRO_FILE),
        };
        debug!(
            dir = %dir.display(),
            intro = assets.intro.is_some(),
            outro = assets.outro.is_some(),
            "bookend assets"
        );
        assets
    }

    pub fn plan(&self, config: &RenderConfig) -> BookendPlan {
        BookendPlan {
            intro: self.intro.clone(),
            outro: self.outro.clone(),
            intro_min: config.intro_min,
            outro_min: config.outro_min,
        }
    }
}

/// Chooses where a render is written when the caller gives no path.
pub trait OutputAllocator {
    fn allocate(&self) -> Result<PathBuf>;
}

/// Hands out `<dir>/render_NNN.mp4`, the first number not already taken.
#[derive(Debug, Clone)]
pub struct SequentialAllocator {
    dir: PathBuf,
}

impl SequentialAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl OutputAllocator for SequentialAllocator {
    fn allocate(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let mut index = 1_u32;
        loop {
            let candidate = self.dir.join(format!("render_{index:03}.mp4"));
            if !candidate.exists() {
                return Ok(candidate);
            }
            index += 1;
        }
    }
}
