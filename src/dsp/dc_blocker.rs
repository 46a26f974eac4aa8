//! First-order DC blocking high-pass.
//!
//! Amp models can leave a small offset on their output; this removes it before
//! the output gain stage. The corner is fixed at 5 Hz.

use std::f32::consts::PI;

pub const DC_BLOCKER_HZ: f32 = 5.0;

#[derive(Debug, Clone)]
pub struct DcBlocker {
    alpha: f32,
    prev_in: f32,
    prev_out: f32,
}

impl DcBlocker {
    pub fn new(sample_rate: f32) -> Self {
        let mut dc = Self {
            alpha: 1.0,
            prev_in: 0.0,
            prev_out: 0.0,
        };
        dc.set_sample_rate(sample_rate);
        dc
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        let c = 2.0 * PI * DC_BLOCKER_HZ / sample_rate;
        self.alpha = 1.0 / (1.0 + c);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.prev_in = 0.0;
        self.prev_out = 0.0;
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            let x = *s;
            let y = self.alpha * (self.prev_out + x - self.prev_in);
            self.prev_in = x;
            self.prev_out = y;
            *s = y;
        }
    }

    /// Samples for the filter to ring down after input stops.
    pub fn tail_samples(sample_rate: f32) -> u32 {
        (10.0 * sample_rate / DC_BLOCKER_HZ) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_constant_offset() {
        let mut dc = DcBlocker::new(48000.0);
        let mut buf = vec![0.3; 48000];
        dc.process_block(&mut buf);
        assert!(buf[0] > 0.29);
        assert!(buf[47999].abs() < 1e-3, "residual {}", buf[47999]);
    }

    #[test]
    fn test_passes_audio_band() {
        let sr = 48000.0;
        let mut dc = DcBlocker::new(sr);
        let mut buf: Vec<f32> = (0..4800)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / sr).sin())
            .collect();
        dc.process_block(&mut buf);
        let peak = buf[2400..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - 1.0).abs() < 2e-3, "1 kHz peak {peak}");
    }

    #[test]
    fn test_tail_length() {
        assert_eq!(DcBlocker::tail_samples(48000.0), 96000);
    }
}
