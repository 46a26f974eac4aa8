/// Floor used when converting silence to decibels.
pub const DB_FLOOR: f32 = -120.0;

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        return DB_FLOOR;
    }
    (20.0 * gain.log10()).max(DB_FLOOR)
}

/// Linear crossfade, `a` at `mix = 0`, `b` at `mix = 1`.
#[inline]
pub fn crossfade(a: f32, b: f32, mix: f32) -> f32 {
    a * (1.0 - mix) + b * mix
}

pub fn peak_abs(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
}

/// Multiply `buf` by `gain` sample-for-sample.
#[inline]
pub fn apply_envelope(buf: &mut [f32], gain: &[f32]) {
    for (s, g) in buf.iter_mut().zip(gain.iter()) {
        *s *= *g;
    }
}

#[inline]
pub fn apply_gain(buf: &mut [f32], gain: f32) {
    for s in buf.iter_mut() {
        *s *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_at_zero_db() {
        assert_eq!(db_to_gain(0.0), 1.0);
    }

    #[test]
    fn test_db_to_gain_strictly_increasing() {
        let mut prev = db_to_gain(-120.0);
        let mut db = -119.5;
        while db <= 60.0 {
            let g = db_to_gain(db);
            assert!(g > prev, "gain not increasing at {db} dB");
            prev = g;
            db += 0.5;
        }
    }

    #[test]
    fn test_known_values() {
        assert!((db_to_gain(20.0) - 10.0).abs() < 1e-4);
        assert!((db_to_gain(-6.0) - 0.501_187).abs() < 1e-5);
        assert!((gain_to_db(0.5) - (-6.0206)).abs() < 1e-3);
        assert_eq!(gain_to_db(0.0), DB_FLOOR);
    }

    #[test]
    fn test_crossfade_endpoints() {
        assert_eq!(crossfade(0.3, -0.7, 0.0), 0.3);
        assert_eq!(crossfade(0.3, -0.7, 1.0), -0.7);
        assert_eq!(crossfade(0.25, 0.25, 0.5), 0.25);
    }

    #[test]
    fn test_peak_abs() {
        assert_eq!(peak_abs(&[0.1, -0.8, 0.5]), 0.8);
        assert_eq!(peak_abs(&[]), 0.0);
    }
}
