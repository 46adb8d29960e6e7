use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{Result, StemSyncError};

/// Analysis window in samples for RMS and the STFT.
pub const FRAME_LENGTH: usize = 2048;
/// Distance in samples between consecutive analysis frames.
pub const HOP_LENGTH: usize = 512;

const LOG_FLOOR: f32 = 1e-10;
const TOP_DB: f32 = 80.0;

const PEAK_PRE_MAX: f64 = 0.03;
const PEAK_PRE_AVG: f64 = 0.10;
const PEAK_POST_AVG: f64 = 0.10;
const PEAK_WAIT: f64 = 0.03;
const PEAK_DELTA: f32 = 0.07;

const TEMPO_MIN_BPM: f64 = 40.0;
const TEMPO_MAX_BPM: f64 = 240.0;
const TEMPO_PRIOR_BPM: f64 = 120.0;
const BEAT_TIGHTNESS: f64 = 100.0;

/// Converts frame indices into seconds.
pub fn frames_to_time(frame: usize, sample_rate: u32) -> f64 {
    (frame * HOP_LENGTH) as f64 / f64::from(sample_rate.max(1))
}

/// Root-mean-square energy per centred, zero-padded frame.
pub fn rms_envelope(samples: &[f32]) -> Vec<f32> {
    let frames = 1 + samples.len() / HOP_LENGTH;
    let half = (FRAME_LENGTH / 2) as isize;

    (0..frames)
        .map(|frame| {
            let center = (frame * HOP_LENGTH) as isize;
            let start = (center - half).max(0) as usize;
            let end = ((center + half).max(0) as usize).min(samples.len());
            let window = if start < end {
                &samples[start..end]
            } else {
                &[][..]
            };
            compute_rms(window, FRAME_LENGTH)
        })
        .collect()
}

/// Spectral-flux onset strength: positive change of the log power spectrum
/// between consecutive frames, averaged over frequency bins.
pub fn onset_strength(samples: &[f32]) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Err(StemSyncError::InvalidInput(
            "onset strength requires at least one sample",
        ));
    }

    let mut stft = Stft::new(FRAME_LENGTH);
    let frames = 1 + samples.len() / HOP_LENGTH;

    // Decibels are referenced to the loudest bin of the whole signal.
    let mut peak = LOG_FLOOR;
    for frame in 0..frames {
        let power = stft.power(samples, frame * HOP_LENGTH)?;
        peak = power.iter().copied().fold(peak, f32::max);
    }
    let floor_db = to_db(peak) - TOP_DB;

    let mut previous: Option<Vec<f32>> = None;
    let mut envelope = Vec::with_capacity(frames);
    for frame in 0..frames {
        let current: Vec<f32> = stft
            .power(samples, frame * HOP_LENGTH)?
            .iter()
            .map(|p| to_db(*p).max(floor_db))
            .collect();
        let flux = match &previous {
            Some(prev) => {
                let sum: f32 = current
                    .iter()
                    .zip(prev)
                    .map(|(now, before)| (now - before).max(0.0))
                    .sum();
                sum / current.len() as f32
            }
            None => 0.0,
        };
        envelope.push(flux);
        previous = Some(current);
    }

    Ok(envelope)
}

/// Picks onset frames from an onset strength envelope.
pub fn detect_onsets(envelope: &[f32], sample_rate: u32) -> Vec<usize> {
    if envelope.is_empty() {
        return Vec::new();
    }

    let normalised = normalise(envelope);
    let frame_rate = f64::from(sample_rate) / HOP_LENGTH as f64;
    let pre_max = (PEAK_PRE_MAX * frame_rate).round() as usize;
    let pre_avg = (PEAK_PRE_AVG * frame_rate).round() as usize;
    let post_avg = (PEAK_POST_AVG * frame_rate).round() as usize + 1;
    let wait = (PEAK_WAIT * frame_rate).round() as usize;

    let len = normalised.len();
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;

    for index in 0..len {
        let value = normalised[index];
        let max_start = index.saturating_sub(pre_max);
        let local_max = normalised[max_start..=index]
            .iter()
            .copied()
            .fold(f32::MIN, f32::max);
        if value < local_max {
            continue;
        }

        let avg_start = index.saturating_sub(pre_avg);
        let avg_end = (index + post_avg).min(len);
        let window = &normalised[avg_start..avg_end];
        let local_mean = window.iter().sum::<f32>() / window.len() as f32;
        if value < local_mean + PEAK_DELTA {
            continue;
        }

        if last_peak.map(|last| index - last <= wait).unwrap_or(false) {
            continue;
        }

        peaks.push(index);
        last_peak = Some(index);
    }

    peaks
}

/// Estimates the global tempo in BPM from the autocorrelation of the onset
/// envelope, weighted by a log-normal prior around 120 BPM.
pub fn estimate_tempo(envelope: &[f32], sample_rate: u32) -> f64 {
    let frame_rate = f64::from(sample_rate) / HOP_LENGTH as f64;
    let shortest = (60.0 * frame_rate / TEMPO_MAX_BPM).floor() as usize;
    let longest = (60.0 * frame_rate / TEMPO_MIN_BPM).ceil() as usize;
    let min_lag = shortest.max(1);
    let max_lag = longest.min(envelope.len());

    let mut best: Option<(f64, f64)> = None;
    for lag in min_lag..max_lag {
        let correlation: f64 = envelope
            .iter()
            .zip(&envelope[lag..])
            .map(|(a, b)| f64::from(*a) * f64::from(*b))
            .sum();
        let bpm = 60.0 * frame_rate / lag as f64;
        let weight = (-0.5 * (bpm / TEMPO_PRIOR_BPM).log2().powi(2)).exp();
        let score = correlation * weight;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((bpm, score));
        }
    }

    match best {
        Some((bpm, score)) if score > 0.0 => bpm,
        _ => TEMPO_PRIOR_BPM,
    }
}

/// Places beats on the onset envelope with dynamic programming: every beat
/// rewards onset strength and penalises deviation from the tempo period.
pub fn track_beats(envelope: &[f32], sample_rate: u32, bpm: f64) -> Vec<usize> {
    if envelope.is_empty() || bpm <= 0.0 || envelope.iter().all(|v| *v <= 0.0) {
        return Vec::new();
    }

    let frame_rate = f64::from(sample_rate) / HOP_LENGTH as f64;
    let period = 60.0 * frame_rate / bpm;
    let local = local_score(envelope, period);

    let mut cumulative = vec![0.0_f64; local.len()];
    let mut backlink: Vec<Option<usize>> = vec![None; local.len()];
    let search_start = (2.0 * period).round() as usize;
    let search_end = (period / 2.0).round().max(1.0) as usize;

    for index in 0..local.len() {
        let lo = index.saturating_sub(search_start);
        let hi = index.saturating_sub(search_end);
        let mut best: Option<(usize, f64)> = None;
        if index >= search_end {
            for prev in lo..=hi {
                let gap = (index - prev) as f64;
                let penalty = BEAT_TIGHTNESS * (gap / period).ln().powi(2);
                let score = cumulative[prev] - penalty;
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) if score > 0.0 => {
                cumulative[index] = local[index] + score;
                backlink[index] = Some(prev);
            }
            _ => cumulative[index] = local[index],
        }
    }

    let Some(mut cursor) = last_strong_peak(&cumulative) else {
        return Vec::new();
    };

    let mut beats = vec![cursor];
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();
    trim_weak_beats(beats, &local)
}

/// Linear-interpolated percentile, `q` in [0, 100]. Empty input yields 0.
pub fn percentile(values: &[f32], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
    sorted.sort_by(f64::total_cmp);

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn local_score(envelope: &[f32], period: f64) -> Vec<f64> {
    let mean = envelope.iter().map(|v| f64::from(*v)).sum::<f64>() / envelope.len() as f64;
    let variance = envelope
        .iter()
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / envelope.len() as f64;
    let std = variance.sqrt().max(f64::EPSILON);

    // Gaussian smoothing with a standard deviation of 1/32 beat period.
    let sigma = (period / 32.0).max(0.5);
    let radius = (3.0 * sigma).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();

    (0..envelope.len() as isize)
        .map(|index| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(offset, weight)| {
                    let source = index + offset as isize - radius;
                    usize::try_from(source)
                        .ok()
                        .and_then(|s| envelope.get(s))
                        .map(|v| weight * f64::from(*v) / std)
                })
                .sum()
        })
        .collect()
}

fn last_strong_peak(cumulative: &[f64]) -> Option<usize> {
    let peaks: Vec<usize> = (0..cumulative.len())
        .filter(|&i| {
            let left = i == 0 || cumulative[i] >= cumulative[i - 1];
            let right = i + 1 == cumulative.len() || cumulative[i] >= cumulative[i + 1];
            left && right && cumulative[i] > 0.0
        })
        .collect();
    if peaks.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = peaks.iter().map(|&i| cumulative[i]).collect();
    values.sort_by(f64::total_cmp);
    let median = values[values.len() / 2];
    peaks
        .into_iter()
        .rev()
        .find(|&i| cumulative[i] >= 0.5 * median)
}

fn trim_weak_beats(beats: Vec<usize>, local: &[f64]) -> Vec<usize> {
    let rms = (local.iter().map(|v| v * v).sum::<f64>() / local.len() as f64).sqrt();
    let threshold = 0.5 * rms;
    let strong = |frame: &usize| local[*frame] >= threshold;

    let Some(first) = beats.iter().position(strong) else {
        return Vec::new();
    };
    let last = beats.iter().rposition(strong).unwrap_or(first);
    beats[first..=last].to_vec()
}

fn normalise(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::MAX, f32::min);
    let shifted: Vec<f32> = values.iter().map(|v| v - min).collect();
    let max = shifted.iter().copied().fold(0.0, f32::max);
    if max <= f32::EPSILON {
        return shifted;
    }
    shifted.into_iter().map(|v| v / max).collect()
}

/// Reusable short-time Fourier transform over centred frames.
struct Stft {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl Stft {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            size,
            plan,
            scratch,
            spectrum,
            input,
        }
    }

    /// Power spectrum of the frame centred on `center`.
    fn power(&mut self, samples: &[f32], center: usize) -> Result<Vec<f32>> {
        let half = self.size / 2;
        for (index, slot) in self.input.iter_mut().enumerate() {
            let sample = (center + index)
                .checked_sub(half)
                .and_then(|i| samples.get(i))
                .copied()
                .unwrap_or(0.0);
            *slot = sample * hann_value(index, self.size);
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        Ok(self.spectrum.iter().map(|bin| bin.norm_sqr()).collect())
    }
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft").field("size", &self.size).finish()
    }
}

fn to_db(power: f32) -> f32 {
    10.0 * power.max(LOG_FLOOR).log10()
}

fn compute_rms(samples: &[f32], frame_length: usize) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / frame_length as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    // Periodic window, matching the usual STFT convention.
    0.5 - 0.5 * ((2.0 * PI * index as f32) / len as f32).cos()
}
