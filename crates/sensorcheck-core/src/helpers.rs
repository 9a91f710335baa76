//! Numeric helpers shared by the verification units.

use crate::event::SensorEvent;

/// Differences between consecutive source timestamps, in nanoseconds.
pub fn timestamp_deltas(events: &[SensorEvent]) -> Vec<i64> {
    events
        .windows(2)
        .map(|pair| pair[1].timestamp_ns - pair[0].timestamp_ns)
        .collect()
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 95th percentile value: `sorted[floor(n * 0.95) - 1]`, clamped to index 0.
pub fn percentile_95(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let index = ((sorted.len() as f64 * 0.95).floor() as usize).saturating_sub(1);
    sorted.get(index).copied()
}

/// Euclidean norm of one event's channel values.
pub fn magnitude(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt()
}

/// Per-channel mean over the first `channels` values of every event.
pub fn channel_means(events: &[SensorEvent], channels: usize) -> Vec<f64> {
    let mut sums = vec![0.0; channels];
    for event in events {
        for (sum, value) in sums.iter_mut().zip(&event.values) {
            *sum += f64::from(*value);
        }
    }
    if events.is_empty() {
        return sums;
    }
    let n = events.len() as f64;
    sums.into_iter().map(|s| s / n).collect()
}

/// Per-channel sample standard deviation (n - 1), accumulated with Welford's method.
pub fn channel_standard_deviations(events: &[SensorEvent], channels: usize) -> Vec<f64> {
    let mut means = vec![0.0; channels];
    let mut m2 = vec![0.0; channels];
    for (i, event) in events.iter().enumerate() {
        let count = (i + 1) as f64;
        for (c, value) in event.values.iter().take(channels).enumerate() {
            let x = f64::from(*value);
            let delta = x - means[c];
            means[c] += delta / count;
            m2[c] += delta * (x - means[c]);
        }
    }
    if events.len() < 2 {
        return vec![0.0; channels];
    }
    let denom = (events.len() - 1) as f64;
    m2.into_iter().map(|v| (v / denom).sqrt()).collect()
}
