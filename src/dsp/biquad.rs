//! Second-order IIR section (transposed direct form II).
//!
//! Coefficient design follows the RBJ audio EQ cookbook. The tone stack builds
//! its shelves and its peaking band from these helpers.
//!
//! # Design Notes
//! - Coefficient updates never touch the delay state, so a knob move does not
//!   click. Call [`Biquad::reset`] when a clean start is wanted.
//! - No allocation anywhere; safe on the audio thread.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Coefficients {
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        let inv_a0 = 1.0 / a0;
        Self {
            b0: b0 * inv_a0,
            b1: b1 * inv_a0,
            b2: b2 * inv_a0,
            a1: a1 * inv_a0,
            a2: a2 * inv_a0,
        }
    }

    pub fn low_shelf(cutoff: f32, q: f32, gain_db: f32, sr: f32) -> Self {
        // Flat shelf is an exact passthrough
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();
        let k = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cw0 + k),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cw0),
            a * ((a + 1.0) - (a - 1.0) * cw0 - k),
            (a + 1.0) + (a - 1.0) * cw0 + k,
            -2.0 * ((a - 1.0) + (a + 1.0) * cw0),
            (a + 1.0) + (a - 1.0) * cw0 - k,
        )
    }

    pub fn high_shelf(cutoff: f32, q: f32, gain_db: f32, sr: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * cutoff / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();
        let k = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cw0 + k),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cw0),
            a * ((a + 1.0) + (a - 1.0) * cw0 - k),
            (a + 1.0) - (a - 1.0) * cw0 + k,
            2.0 * ((a - 1.0) - (a + 1.0) * cw0),
            (a + 1.0) - (a - 1.0) * cw0 - k,
        )
    }

    pub fn peaking(center: f32, q: f32, gain_db: f32, sr: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::IDENTITY;
        }

        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * center / sr;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        let cw0 = w0.cos();

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cw0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cw0,
            1.0 - alpha / a,
        )
    }

    /// Magnitude response at `freq`, used by tests and meters.
    pub fn magnitude_at(&self, freq: f32, sr: f32) -> f32 {
        let w = 2.0 * PI * freq / sr;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

impl Default for Coefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    coeffs: Coefficients,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set_coefficients(&mut self, coeffs: Coefficients) {
        self.coeffs = coeffs;
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coeffs
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let out = input * c.b0 + self.z1;
        self.z1 = input * c.b1 + self.z2 - c.a1 * out;
        self.z2 = input * c.b2 - c.a2 * out;
        out
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = self.process(*s);
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passthrough() {
        let mut bq = Biquad::new();
        let mut buf = [0.5, -0.25, 0.125, 1.0];
        bq.process_block(&mut buf);
        assert_eq!(buf, [0.5, -0.25, 0.125, 1.0]);
    }

    #[test]
    fn test_flat_gain_is_identity() {
        assert_eq!(
            Coefficients::low_shelf(100.0, 0.707, 0.0, 48000.0),
            Coefficients::IDENTITY
        );
        assert_eq!(
            Coefficients::peaking(1000.0, 0.7, 0.001, 48000.0),
            Coefficients::IDENTITY
        );
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let c = Coefficients::peaking(1000.0, 0.7, 6.0, 48000.0);
        let mag_db = 20.0 * c.magnitude_at(1000.0, 48000.0).log10();
        assert!((mag_db - 6.0).abs() < 0.05, "got {mag_db}");
    }

    #[test]
    fn test_shelves_hit_their_plateaus() {
        let low = Coefficients::low_shelf(100.0, 0.707, -8.0, 48000.0);
        let low_db = 20.0 * low.magnitude_at(2.0, 48000.0).log10();
        assert!((low_db + 8.0).abs() < 0.3, "low shelf plateau {low_db}");

        let high = Coefficients::high_shelf(2000.0, 0.707, 6.0, 48000.0);
        let high_db = 20.0 * high.magnitude_at(23900.0, 48000.0).log10();
        assert!((high_db - 6.0).abs() < 0.3, "high shelf plateau {high_db}");
    }
}
