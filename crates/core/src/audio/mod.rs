use std::path::Path;

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::analysis::{self, percentile};
use crate::{Result, StemSyncError};

/// Energy over time for one audio file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame times in seconds, ascending.
    pub times: Vec<f64>,
    /// RMS magnitude per frame.
    pub values: Vec<f32>,
    /// Length of the decoded audio in seconds.
    pub duration: f64,
}

impl Envelope {
    /// Linear interpolation of the envelope at `time`, holding the first and
    /// last values outside the sampled range.
    pub fn interpolate(&self, time: f64) -> f64 {
        let (Some(first), Some(last)) = (self.times.first(), self.times.last()) else {
            return 0.0;
        };
        if time <= *first {
            return f64::from(self.values[0]);
        }
        if time >= *last {
            return f64::from(self.values[self.values.len() - 1]);
        }

        let upper = self.times.partition_point(|t| *t <= time);
        let lower = upper - 1;
        let (t0, t1) = (self.times[lower], self.times[upper]);
        let (v0, v1) = (f64::from(self.values[lower]), f64::from(self.values[upper]));
        if t1 <= t0 {
            return v0;
        }
        v0 + (v1 - v0) * (time - t0) / (t1 - t0)
    }

    pub fn percentile(&self, q: f64) -> f64 {
        percentile(&self.values, q)
    }
}

/// Beat and onset estimates for one audio file, in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rhythm {
    pub beats: Vec<f64>,
    pub onsets: Vec<f64>,
}

/// Low-level audio feature extraction. Everything above this seam works on
/// envelopes and time lists only.
pub trait AudioFeatures {
    /// RMS envelope and duration of the audio at `path`.
    fn envelope(&self, path: &Path) -> Result<Envelope>;
    /// Raw beat and onset times of the audio at `path`.
    fn rhythm(&self, path: &Path) -> Result<Rhythm>;
}

/// Mono waveform at its native sample rate.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Decodes any supported audio file, down-mixing to mono.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            Self::load_wav(path)
        } else {
            Self::load_symphonia(path)
        }
    }

    fn load_wav(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).map_err(|e| StemSyncError::decode(path, e))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| StemSyncError::decode(path, e))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| StemSyncError::decode(path, e))?
            }
        };

        Ok(Self {
            samples: downmix(&interleaved, channels),
            sample_rate: spec.sample_rate,
        })
    }

    fn load_symphonia(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| StemSyncError::decode(path, e))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| StemSyncError::decode(path, "no audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| StemSyncError::decode(path, "unknown sample rate"))?;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| StemSyncError::decode(path, e))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(StemSyncError::decode(path, e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frames are dropped; the stream continues.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(StemSyncError::decode(path, e)),
            };
            let channels = decoded.spec().channels.count().max(1);
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buffer.copy_interleaved_ref(decoded);
            samples.extend(downmix(buffer.samples(), channels));
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Default [`AudioFeatures`] backend: decodes the file and runs the
/// spectral primitives from [`crate::analysis`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralAnalyzer;

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn envelope_of(waveform: &Waveform) -> Envelope {
        let values = analysis::rms_envelope(&waveform.samples);
        let times = (0..values.len())
            .map(|frame| analysis::frames_to_time(frame, waveform.sample_rate))
            .collect();
        Envelope {
            times,
            values,
            duration: waveform.duration(),
        }
    }

    pub fn rhythm_of(waveform: &Waveform) -> Result<Rhythm> {
        let sr = waveform.sample_rate;
        let strength = analysis::onset_strength(&waveform.samples)?;
        let onsets = analysis::detect_onsets(&strength, sr)
            .into_iter()
            .map(|frame| analysis::frames_to_time(frame, sr))
            .collect();
        let bpm = analysis::estimate_tempo(&strength, sr);
        let beats = analysis::track_beats(&strength, sr, bpm)
            .into_iter()
            .map(|frame| analysis::frames_to_time(frame, sr))
            .collect();
        tracing::debug!(bpm, "estimated tempo");
        Ok(Rhythm { beats, onsets })
    }
}

impl AudioFeatures for SpectralAnalyzer {
    fn envelope(&self, path: &Path) -> Result<Envelope> {
        let waveform = Waveform::load(path)?;
        Ok(Self::envelope_of(&waveform))
    }

    fn rhythm(&self, path: &Path) -> Result<Rhythm> {
        let waveform = Waveform::load(path)?;
        Self::rhythm_of(&waveform)
    }
}
