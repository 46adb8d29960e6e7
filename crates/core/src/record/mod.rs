use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::render::{Clip, Piece};
use crate::{Result, StemSyncError};

/// Output encoding options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub crf: u8,
    pub preset: String,
    /// ffmpeg executable name or path.
    pub ffmpeg: String,
    /// ffprobe executable name or path.
    pub ffprobe: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 24,
            width: 1920,
            height: 1080,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            crf: 18,
            preset: "medium".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Everything the codec needs to write the final file.
#[derive(Debug, Clone, Copy)]
pub struct EncodeJob<'a> {
    /// Video segments in playback order.
    pub segments: &'a [Clip],
    /// Final mixed audio track.
    pub audio: &'a Path,
    /// Output duration, pinned to the audio track.
    pub duration: f64,
    pub output: &'a Path,
}

/// Video decoding and final encode/mux.
pub trait MediaCodec {
    /// Opens a video and reports its duration in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64>;
    /// Renders the segments, attaches the audio and writes the output.
    fn encode(&self, job: &EncodeJob<'_>) -> Result<()>;
}

/// [`MediaCodec`] backed by the ffmpeg and ffprobe command line tools.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCodec {
    settings: RecordingSettings,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegCodec {
    pub fn new(settings: RecordingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Command line for `job`, excluding the ffmpeg binary itself.
    pub fn build_args(&self, job: &EncodeJob<'_>) -> Result<Vec<String>> {
        let pieces: Vec<Piece> = job.segments.iter().flat_map(Clip::pieces).collect();
        if pieces.is_empty() {
            return Err(StemSyncError::AssemblyEmpty);
        }

        let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];
        for piece in &pieces {
            args.extend([
                "-ss".into(),
                format!("{:.3}", piece.offset),
                "-t".into(),
                format!("{:.3}", piece.duration),
                "-i".into(),
                piece.path.to_string_lossy().into_owned(),
            ]);
        }
        args.extend(["-i".into(), job.audio.to_string_lossy().into_owned()]);

        let video_length: f64 = pieces.iter().map(|p| p.duration).sum();
        args.extend([
            "-filter_complex".into(),
            self.filter_graph(&pieces, job.duration - video_length),
            "-map".into(),
            "[outv]".into(),
            "-map".into(),
            format!("{}:a:0", pieces.len()),
            "-c:v".into(),
            self.settings.video_codec.clone(),
            "-preset".into(),
            self.settings.preset.clone(),
            "-crf".into(),
            self.settings.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-r".into(),
            self.settings.fps.to_string(),
            "-c:a".into(),
            self.settings.audio_codec.clone(),
            "-t".into(),
            format!("{:.3}", job.duration),
            job.output.to_string_lossy().into_owned(),
        ]);
        Ok(args)
    }

    fn filter_graph(&self, pieces: &[Piece], shortfall: f64) -> String {
        let RecordingSettings {
            width, height, fps, ..
        } = self.settings;

        let mut graph = String::new();
        for (index, piece) in pieces.iter().enumerate() {
            let _ = write!(
                graph,
                "[{index}:v]trim=duration={:.3},setpts=PTS-STARTPTS",
                piece.duration
            );
            if piece.reversed {
                graph.push_str(",reverse");
            }
            if piece.mirrored {
                graph.push_str(",hflip");
            }
            let _ = write!(
                graph,
                ",scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}[v{index}];"
            );
        }
        for index in 0..pieces.len() {
            let _ = write!(graph, "[v{index}]");
        }
        // Clone the last frame so short video never cuts the audio; `-t`
        // trims whatever is left over.
        let _ = write!(
            graph,
            "concat=n={}:v=1:a=0[cat];[cat]tpad=stop_mode=clone:stop_duration={:.3}[outv]",
            pieces.len(),
            shortfall.max(0.0) + 1.0
        );
        graph
    }

    fn locate(name: &str) -> Result<PathBuf> {
        which::which(name)
            .map_err(|_| StemSyncError::ToolNotFound(name.to_string()))
    }
}

impl MediaCodec for FfmpegCodec {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
            .into());
        }

        let ffprobe = Self::locate(&self.settings.ffprobe)?;
        let output = Command::new(ffprobe)
            .args(["-v", "error", "-of", "json"])
            .args(["-show_entries", "format=duration"])
            .arg(path)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(StemSyncError::codec(
                format!("ffprobe failed on {}", path.display()),
                Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                output.status.code(),
            ));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        let duration = probe
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| {
                StemSyncError::codec(
                    format!("no duration reported for {}", path.display()),
                    None,
                    None,
                )
            })?;
        debug!(path = %path.display(), duration, "probed video");
        Ok(duration)
    }

    fn encode(&self, job: &EncodeJob<'_>) -> Result<()> {
        let ffmpeg = Self::locate(&self.settings.ffmpeg)?;
        let args = self.build_args(job)?;
        info!(
            output = %job.output.display(),
            segments = job.segments.len(),
            duration = job.duration,
            "encoding"
        );

        let output = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(StemSyncError::codec(
                "ffmpeg encode failed",
                Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                output.status.code(),
            ));
        }
        Ok(())
    }
}
