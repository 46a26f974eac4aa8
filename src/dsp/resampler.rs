//! Sample-rate conversion.
//!
//! Two flavours live here:
//! - [`CubicResampler`]: a streaming Catmull-Rom interpolator used around amp
//!   models whose native rate differs from the host's. Constant memory, no
//!   allocation per call, a fixed two-sample interpolation delay.
//! - [`resample_offline`]: a one-shot rubato conversion for impulse responses,
//!   run off the audio thread. Its output is aligned (the resampler's own delay
//!   is trimmed) and sized to `len * to / from`.

use rubato::{FftFixedIn, ResampleError, Resampler, ResamplerConstructionError};
use thiserror::Error;

/// Input samples between the newest input and the interpolation point.
pub const CUBIC_DELAY_SAMPLES: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct CubicResampler {
    // Input samples consumed per output sample
    step: f64,
    phase: f64,
    taps: [f32; 4],
}

impl CubicResampler {
    pub fn new(from_rate: f64, to_rate: f64) -> Self {
        Self {
            step: from_rate / to_rate,
            phase: 0.0,
            taps: [0.0; 4],
        }
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.taps = [0.0; 4];
    }

    /// Upper bound on outputs produced for `input_len` inputs.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        (input_len as f64 / self.step).ceil() as usize + 2
    }

    /// Consume all of `input`, write into `output` and return the count
    /// written. Samples past `output.len()` are dropped.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let mut written = 0;
        for &x in input {
            self.taps = [self.taps[1], self.taps[2], self.taps[3], x];
            while self.phase < 1.0 {
                if written < output.len() {
                    output[written] = catmull_rom(&self.taps, self.phase as f32);
                    written += 1;
                }
                self.phase += self.step;
            }
            self.phase -= 1.0;
        }
        written
    }
}

#[inline]
fn catmull_rom(t: &[f32; 4], frac: f32) -> f32 {
    let [x0, x1, x2, x3] = *t;
    let c1 = 0.5 * (x2 - x0);
    let c2 = x0 - 2.5 * x1 + 2.0 * x2 - 0.5 * x3;
    let c3 = 0.5 * (x3 - x0) + 1.5 * (x1 - x2);
    ((c3 * frac + c2) * frac + c1) * frac + x1
}

const OFFLINE_CHUNK: usize = 1024;

#[derive(Error, Debug)]
pub enum OfflineResampleError {
    #[error("cannot build resampler: {0}")]
    Construction(#[from] ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Process(#[from] ResampleError),
}

/// Resample planar channels from `from_rate` to `to_rate`.
pub fn resample_offline(
    channels: &[Vec<f32>],
    from_rate: f64,
    to_rate: f64,
) -> Result<Vec<Vec<f32>>, OfflineResampleError> {
    if channels.is_empty() || (from_rate - to_rate).abs() < f64::EPSILON {
        return Ok(channels.to_vec());
    }
    let input_frames = channels[0].len();
    let expected = ((input_frames as f64 * to_rate / from_rate).round() as usize).max(1);

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate.round() as usize,
        to_rate.round() as usize,
        OFFLINE_CHUNK,
        2,
        channels.len(),
    )?;

    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> =
        vec![Vec::with_capacity(expected + delay + OFFLINE_CHUNK); channels.len()];
    let mut chunk: Vec<Vec<f32>> = vec![vec![0.0; OFFLINE_CHUNK]; channels.len()];

    let mut pos = 0;
    while out[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        for (dst, src) in chunk.iter_mut().zip(channels.iter()) {
            dst.resize(needed, 0.0);
            dst.fill(0.0);
            if pos < src.len() {
                let n = (src.len() - pos).min(needed);
                dst[..n].copy_from_slice(&src[pos..pos + n]);
            }
        }
        let produced = resampler.process(&chunk, None)?;
        for (dst, src) in out.iter_mut().zip(produced.iter()) {
            dst.extend_from_slice(src);
        }
        pos += needed;
    }

    for ch in out.iter_mut() {
        ch.drain(..delay);
        ch.truncate(expected);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_rates_pass_through_with_fixed_delay() {
        let mut rs = CubicResampler::new(48000.0, 48000.0);
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut out = vec![0.0; 32];
        let n = rs.process(&input, &mut out);
        assert_eq!(n, 16);
        // Output lags the input by two samples
        for i in 2..16 {
            assert!((out[i] - (i - 2) as f32).abs() < 1e-5);
        }
    }

    #[test]
    fn test_output_count_tracks_ratio() {
        let mut up = CubicResampler::new(44100.0, 48000.0);
        let mut out = vec![0.0; 2048];
        let mut total = 0;
        for _ in 0..100 {
            total += up.process(&[0.0; 441], &mut out);
        }
        assert!((total as i64 - 48000).abs() <= 2, "got {total}");
    }

    #[test]
    fn test_round_trip_never_starves() {
        // host -> model -> host must yield at least as many samples as went in
        let mut up = CubicResampler::new(44100.0, 48000.0);
        let mut down = CubicResampler::new(48000.0, 44100.0);
        let mut mid = vec![0.0; 1024];
        let mut out = vec![0.0; 1024];
        let (mut fed, mut produced) = (0usize, 0usize);
        for block in [128usize, 77, 256, 3, 512].iter().cycle().take(50) {
            let input = vec![0.1; *block];
            let n_mid = up.process(&input, &mut mid);
            produced += down.process(&mid[..n_mid], &mut out);
            fed += block;
            assert!(produced + 1 >= fed, "fed {fed} produced {produced}");
        }
    }

    #[test]
    fn test_offline_resample_length_and_identity() {
        let ir: Vec<f32> = (0..4410).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let same = resample_offline(&[ir.clone()], 44100.0, 44100.0).unwrap();
        assert_eq!(same[0], ir);

        let up = resample_offline(&[ir.clone(), ir], 44100.0, 48000.0).unwrap();
        assert_eq!(up.len(), 2);
        assert_eq!(up[0].len(), 4800);
        assert_eq!(up[1].len(), 4800);
    }
}
