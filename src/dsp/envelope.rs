//! Envelope stages of the dynamic range compressor
//!
//! The gain curve is computed at window resolution and only expanded to one
//! value per frame at the very end.

use crate::engine::buffer::{db_to_linear, linear_to_db};

/// Smallest linear level used when inverting the envelope
pub const GAIN_EPSILON: f64 = 1e-10;

/// Reduce interleaved samples to one absolute peak per frame
///
/// Multi-channel input takes the largest absolute value across channels.
pub fn mono_peaks(samples: &[f32], num_channels: usize) -> Vec<f32> {
    let num_channels = num_channels.max(1);
    samples
        .chunks_exact(num_channels)
        .map(|frame| frame.iter().fold(0.0_f32, |acc, s| acc.max(s.abs())))
        .collect()
}

/// Peak level per analysis window, in dB
///
/// Window `i` starts at `i * window_size` and looks one window ahead, so it
/// covers `[i * window_size, i * window_size + 2 * window_size)` clipped to
/// the signal. Non-empty input always yields `ceil(len / window_size)`
/// entries; empty input yields none.
pub fn peak_envelope_db(peaks: &[f32], window_size: usize) -> Vec<f64> {
    let window_size = window_size.max(1);
    let len = peaks.len();
    let num_windows = len.div_ceil(window_size);

    (0..num_windows)
        .map(|i| {
            let start = i * window_size;
            let end = (start + 2 * window_size).min(len);
            let peak = peaks[start..end].iter().fold(0.0_f32, |acc, &p| acc.max(p));
            linear_to_db(peak as f64)
        })
        .collect()
}

/// Asymmetric paraboloid hull over the envelope
///
/// Every window's level spreads to its neighbours along a falling curve: a
/// square law over `release_width_s` after it and a fourth-power law over
/// `attack_width_s` before it (one dB of fall at one width). The result is
/// the upper hull of those curves, so it is never below the input.
pub fn paraboloid_hull(
    envelope_db: &[f64],
    window_secs: f64,
    attack_width_s: f64,
    release_width_s: f64,
    attack_exponent: i32,
    release_exponent: i32,
) -> Vec<f64> {
    let n = envelope_db.len();
    if n < 2 || window_secs <= 0.0 {
        return envelope_db.to_vec();
    }

    let (lo, hi) = envelope_db
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = hi - lo;
    if range <= 0.0 {
        return envelope_db.to_vec();
    }

    // Beyond this many windows a curve has fallen further than the whole
    // envelope spans and can no longer win the max.
    let reach = |width: f64, exponent: i32| -> usize {
        let secs = width * range.powf(1.0 / exponent as f64);
        ((secs / window_secs).ceil() as usize).min(n)
    };
    let release_reach = reach(release_width_s, release_exponent);
    let attack_reach = reach(attack_width_s, attack_exponent);

    let drop = |distance: usize, width: f64, exponent: i32| -> f64 {
        (distance as f64 * window_secs / width).powi(exponent)
    };

    (0..n)
        .map(|i| {
            let mut level = envelope_db[i];
            // Peaks behind `i` release into it
            for d in 1..=release_reach.min(i) {
                level = level.max(envelope_db[i - d] - drop(d, release_width_s, release_exponent));
            }
            // Peaks ahead of `i` attack into it
            for d in 1..=attack_reach.min(n - 1 - i) {
                level = level.max(envelope_db[i + d] - drop(d, attack_width_s, attack_exponent));
            }
            level
        })
        .collect()
}

/// Push levels below `floor_db` further down
///
/// `result = floor + (value - floor) * -noise_factor`. A factor of 0 pins
/// quiet passages at the floor; positive factors mirror them above it so the
/// gain stage turns them down instead of bringing them up.
pub fn apply_floor_and_gate(envelope_db: &[f64], floor_db: f64, noise_factor: f64) -> Vec<f64> {
    envelope_db
        .iter()
        .map(|&v| {
            if v < floor_db {
                floor_db + (v - floor_db) * -noise_factor
            } else {
                v
            }
        })
        .collect()
}

/// Turn the shaped envelope into a linear gain per window
///
/// The envelope is scaled by `ratio`, converted back to linear, inverted and
/// multiplied by `scale_max`.
pub fn gain_curve(envelope_db: &[f64], ratio: f64, scale_max: f64) -> Vec<f64> {
    envelope_db
        .iter()
        .map(|&v| {
            let level = db_to_linear(v * ratio);
            scale_max / level.max(GAIN_EPSILON)
        })
        .collect()
}

/// Linearly stretch `curve` to exactly `len` points
///
/// Point `k` of the curve lands on position `k * (len - 1) / (n - 1)`.
pub fn interpolate(curve: &[f64], len: usize) -> Vec<f64> {
    match (curve.len(), len) {
        (_, 0) => Vec::new(),
        (0, _) => vec![0.0; len],
        (1, _) => vec![curve[0]; len],
        (_, 1) => vec![curve[0]],
        (n, _) => {
            let step = (n - 1) as f64 / (len - 1) as f64;
            (0..len)
                .map(|i| {
                    let pos = i as f64 * step;
                    let idx = (pos.floor() as usize).min(n - 2);
                    let frac = pos - idx as f64;
                    curve[idx] * (1.0 - frac) + curve[idx + 1] * frac
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mono_peaks_takes_cross_channel_max() {
        let peaks = mono_peaks(&[0.1, -0.7, 0.3, 0.2, -0.05, 0.0], 2);
        assert_eq!(peaks, vec![0.7, 0.3, 0.05]);
    }

    #[test]
    fn test_envelope_window_count() {
        assert!(peak_envelope_db(&[], 1500).is_empty());
        assert_eq!(peak_envelope_db(&[0.5], 1500).len(), 1);
        assert_eq!(peak_envelope_db(&vec![0.5; 1500], 1500).len(), 1);
        assert_eq!(peak_envelope_db(&vec![0.5; 1501], 1500).len(), 2);
    }

    #[test]
    fn test_envelope_looks_one_window_ahead() {
        let mut peaks = vec![0.0_f32; 6];
        peaks[4] = 1.0;
        let env = peak_envelope_db(&peaks, 2);
        // Window 1 covers [2, 6) and sees the peak at 4
        assert_eq!(env.len(), 3);
        assert_relative_eq!(env[0], -120.0);
        assert_relative_eq!(env[1], 0.0);
        assert_relative_eq!(env[2], 0.0);
    }

    #[test]
    fn test_floor_and_gate() {
        let env = [-6.0, -30.0, -120.0];
        assert_eq!(apply_floor_and_gate(&env, -18.0, 0.0), vec![-6.0, -18.0, -18.0]);
        assert_eq!(apply_floor_and_gate(&env, -18.0, 1.0), vec![-6.0, -6.0, 84.0]);
    }

    #[test]
    fn test_gain_curve_inverts_level() {
        let gains = gain_curve(&[-20.0, 0.0], 1.0, 1.0);
        assert_relative_eq!(gains[0], 10.0, epsilon = 1e-9);
        assert_relative_eq!(gains[1], 1.0, epsilon = 1e-12);

        // Levels far below epsilon stay finite
        let gains = gain_curve(&[-1000.0], 1.0, 0.5);
        assert_relative_eq!(gains[0], 0.5 / GAIN_EPSILON);
    }

    #[test]
    fn test_interpolate_endpoints_and_length() {
        let out = interpolate(&[0.0, 1.0, 0.0], 5);
        assert_eq!(out.len(), 5);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.5);
        assert_relative_eq!(out[2], 1.0);
        assert_relative_eq!(out[4], 0.0);

        assert_eq!(interpolate(&[2.0], 3), vec![2.0, 2.0, 2.0]);
        assert!(interpolate(&[1.0, 2.0], 0).is_empty());
        assert_eq!(interpolate(&[1.0, 2.0], 1), vec![1.0]);
    }

    #[test]
    fn test_paraboloid_hull_never_below_input() {
        let env = vec![-60.0, -60.0, 0.0, -60.0, -60.0, -60.0];
        let hull = paraboloid_hull(&env, 0.05, 0.1, 0.2, 4, 2);
        for (h, e) in hull.iter().zip(&env) {
            assert!(h >= e);
        }
        // Release side: 0.05 s after the peak with a 0.2 s width falls (0.25)^2 dB
        assert_relative_eq!(hull[3], -0.0625, epsilon = 1e-9);
        // Attack side: 0.05 s before the peak with a 0.1 s width falls (0.5)^4 dB
        assert_relative_eq!(hull[1], -0.0625, epsilon = 1e-9);
    }

    #[test]
    fn test_paraboloid_hull_is_asymmetric() {
        let mut env = vec![-100.0; 41];
        env[20] = 0.0;
        let hull = paraboloid_hull(&env, 0.1, 0.5, 0.5, 4, 2);
        // 1 s away: release falls (2)^2 = 4 dB, attack falls (2)^4 = 16 dB
        assert_relative_eq!(hull[30], -4.0, epsilon = 1e-9);
        assert_relative_eq!(hull[10], -16.0, epsilon = 1e-9);
    }

    #[test]
    fn test_paraboloid_hull_flat_input_is_unchanged() {
        let env = vec![-12.0; 10];
        assert_eq!(paraboloid_hull(&env, 0.03, 0.1, 0.2, 4, 2), env);
    }
}
