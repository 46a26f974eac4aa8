//! Zero-latency partitioned convolution for cabinet impulse responses.
//!
//! The kernel is split at `PARTITION` taps:
//! - **Head** (`h[0..P]`): direct-form FIR, evaluated per sample, so there is
//!   no block delay.
//! - **Tail** (`h[P..]`): uniformly partitioned overlap-save with FFT size
//!   `2P`. Tail partition `k` multiplies the spectrum of input block `m-1-k`,
//!   so the tail contribution for block `m` is ready as soon as block `m-1`
//!   has been collected.
//!
//! ## Audio Thread Safety
//! - All buffers and FFT plans are built in `new()`
//! - `process_block()` never allocates

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Partition length in samples. The FFT runs at twice this size.
pub const PARTITION: usize = 64;

pub struct Convolver {
    // Head taps, reversed, doubled history for branch-free dot products
    head: Vec<f32>,
    history: Vec<f32>,
    hist_pos: usize,

    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    fft_scratch: Vec<Complex<f32>>,

    // Tail partition spectra, length 2P each
    tail_spectra: Vec<Vec<Complex<f32>>>,
    // Frequency-domain delay line of past input spectra
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,

    prev_block: Vec<f32>,
    cur_block: Vec<f32>,
    block_pos: usize,
    tail_out: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,

    kernel_len: usize,
}

impl Convolver {
    pub fn new(kernel: &[f32]) -> Self {
        let p = PARTITION;
        let n = 2 * p;

        let head_len = kernel.len().min(p);
        let head: Vec<f32> = kernel[..head_len].to_vec();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        let mut fft_scratch = vec![Complex::default(); scratch_len];
        let tail = if kernel.len() > p { &kernel[p..] } else { &[][..] };
        let tail_spectra: Vec<Vec<Complex<f32>>> = tail
            .chunks(p)
            .map(|part| {
                let mut spec = vec![Complex::default(); n];
                for (dst, &h) in spec.iter_mut().zip(part.iter()) {
                    dst.re = h;
                }
                fft.process_with_scratch(&mut spec, &mut fft_scratch);
                spec
            })
            .collect();
        let partitions = tail_spectra.len();

        Self {
            head,
            history: vec![0.0; 2 * p],
            hist_pos: 0,
            fft,
            ifft,
            fft_scratch,
            tail_spectra,
            fdl: vec![vec![Complex::default(); n]; partitions.max(1)],
            fdl_pos: 0,
            prev_block: vec![0.0; p],
            cur_block: vec![0.0; p],
            block_pos: 0,
            tail_out: vec![0.0; p],
            spectrum: vec![Complex::default(); n],
            accum: vec![Complex::default(); n],
            kernel_len: kernel.len(),
        }
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel_len
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.hist_pos = 0;
        for spec in self.fdl.iter_mut() {
            spec.fill(Complex::default());
        }
        self.fdl_pos = 0;
        self.prev_block.fill(0.0);
        self.cur_block.fill(0.0);
        self.block_pos = 0;
        self.tail_out.fill(0.0);
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = self.process_sample(*s);
        }
    }

    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let p = PARTITION;

        // history[pos] and history[pos + P] hold the same sample
        self.hist_pos = if self.hist_pos == 0 { p - 1 } else { self.hist_pos - 1 };
        self.history[self.hist_pos] = x;
        self.history[self.hist_pos + p] = x;
        let recent = &self.history[self.hist_pos..self.hist_pos + self.head.len()];
        let mut y: f32 = recent.iter().zip(self.head.iter()).map(|(a, b)| a * b).sum();

        if !self.tail_spectra.is_empty() {
            y += self.tail_out[self.block_pos];
            self.cur_block[self.block_pos] = x;
            self.block_pos += 1;
            if self.block_pos == p {
                self.advance_tail();
                self.block_pos = 0;
            }
        }

        y
    }

    /// Input block complete: compute the tail contribution for the next one.
    fn advance_tail(&mut self) {
        let p = PARTITION;
        let n = 2 * p;
        let partitions = self.tail_spectra.len();

        for (i, c) in self.spectrum.iter_mut().enumerate() {
            let v = if i < p {
                self.prev_block[i]
            } else {
                self.cur_block[i - p]
            };
            *c = Complex::new(v, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.fft_scratch);

        self.fdl_pos = (self.fdl_pos + 1) % partitions;
        self.fdl[self.fdl_pos].copy_from_slice(&self.spectrum);

        self.accum.fill(Complex::default());
        for k in 0..partitions {
            let idx = (self.fdl_pos + partitions - k) % partitions;
            let x = &self.fdl[idx];
            let h = &self.tail_spectra[k];
            for ((acc, a), b) in self.accum.iter_mut().zip(x.iter()).zip(h.iter()) {
                *acc += a * b;
            }
        }
        self.ifft
            .process_with_scratch(&mut self.accum, &mut self.fft_scratch);

        let norm = 1.0 / n as f32;
        for (dst, c) in self.tail_out.iter_mut().zip(self.accum[p..].iter()) {
            *dst = c.re * norm;
        }

        std::mem::swap(&mut self.prev_block, &mut self.cur_block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
        (0..x.len())
            .map(|n| {
                h.iter()
                    .enumerate()
                    .take(n + 1)
                    .map(|(k, hk)| hk * x[n - k])
                    .sum()
            })
            .collect()
    }

    fn pseudo_random(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn test_impulse_reproduces_kernel_without_delay() {
        let kernel = pseudo_random(300, 7);
        let mut conv = Convolver::new(&kernel);
        let mut buf = vec![0.0; 512];
        buf[0] = 1.0;
        conv.process_block(&mut buf);
        assert_eq!(buf.len(), 512);
        for (i, (&got, &want)) in buf.iter().zip(kernel.iter()).enumerate() {
            assert!((got - want).abs() < 1e-4, "tap {i}: {got} vs {want}");
        }
        assert!(buf[300..].iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn test_matches_direct_convolution_across_odd_blocks() {
        let kernel = pseudo_random(1000, 3);
        let input = pseudo_random(4000, 11);
        let want = direct_convolution(&input, &kernel);

        let mut conv = Convolver::new(&kernel);
        let mut got = input.clone();
        let mut pos = 0;
        for size in [1usize, 37, 64, 129, 500].iter().cycle() {
            if pos >= got.len() {
                break;
            }
            let end = (pos + size).min(got.len());
            conv.process_block(&mut got[pos..end]);
            pos = end;
        }

        for i in 0..input.len() {
            assert!((got[i] - want[i]).abs() < 1e-3, "sample {i}: {} vs {}", got[i], want[i]);
        }
    }

    #[test]
    fn test_short_kernel_is_pure_fir() {
        let kernel = [0.5, 0.25];
        let mut conv = Convolver::new(&kernel);
        let mut buf = [1.0, 0.0, 0.0, 2.0];
        conv.process_block(&mut buf);
        assert_eq!(buf, [0.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_reset_clears_tail() {
        let kernel = pseudo_random(200, 5);
        let mut conv = Convolver::new(&kernel);
        let mut buf = vec![1.0; 256];
        conv.process_block(&mut buf);
        conv.reset();
        let mut silence = vec![0.0; 256];
        conv.process_block(&mut silence);
        assert!(silence.iter().all(|&v| v == 0.0));
    }
}
