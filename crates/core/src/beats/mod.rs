//! Beat clock: raw beat estimates nudged onto nearby transients.

/// Moves each beat onto its nearest onset when the onset lies within
/// `window` seconds. The result is sorted and free of duplicates.
pub fn snap_beats(beats: &[f64], onsets: &[f64], window: f64) -> Vec<f64> {
    let mut snapped: Vec<f64> = beats
        .iter()
        .map(|&beat| match nearest(onsets, beat) {
            Some(onset) if (onset - beat).abs() <= window => onset,
            _ => beat,
        })
        .collect();

    snapped.sort_by(f64::total_cmp);
    snapped.dedup();
    snapped
}

fn nearest(onsets: &[f64], beat: f64) -> Option<f64> {
    onsets
        .iter()
        .copied()
        .min_by(|a, b| (a - beat).abs().total_cmp(&(b - beat).abs()))
}

/// First beat at or after `time`, or `time` itself when none is left.
pub fn next_beat_after(beats: &[f64], time: f64) -> f64 {
    beats.iter().copied().find(|&b| b >= time).unwrap_or(time)
}
