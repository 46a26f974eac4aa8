//! Cabinet impulse responses.
//!
//! An [`ImpulseResponse`] is the raw kernel as loaded, at its own rate. A
//! [`CabinetIr`] owns one and the per-channel convolvers built from it for the
//! current stream rate. Resampling and convolver construction happen in
//! `prepare()`, never while a block is being convolved.

use super::{StreamConfig, NUM_CHANNELS};
use crate::dsp::utils::db_to_gain;
use crate::dsp::{resample_offline, Convolver};
use crate::error::IrLoadError;
use log::info;
use std::path::Path;

/// Longest kernel kept after resampling, in taps.
pub const MAX_IR_LENGTH: usize = 8192;

/// Kernels are scaled by this much at the reference rate.
const IR_GAIN_DB: f32 = -18.0;
const IR_REFERENCE_RATE: f32 = 48000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
    sample_rate: f32,
}

impl ImpulseResponse {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: f32) -> Result<Self, IrLoadError> {
        if channels.is_empty() || channels[0].is_empty() {
            return Err(IrLoadError::InvalidFormat("impulse response is empty".into()));
        }
        if channels.iter().any(|c| c.len() != channels[0].len()) {
            return Err(IrLoadError::InvalidFormat(
                "impulse response channels differ in length".into(),
            ));
        }
        if !(sample_rate > 0.0) {
            return Err(IrLoadError::InvalidFormat(format!(
                "invalid sample rate {sample_rate}"
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Kernel for internal channel `index`. Mono IRs feed every channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        let last = self.channels.len() - 1;
        &self.channels[index.min(last)]
    }

    /// Same response at `target_rate`.
    pub fn resampled(&self, target_rate: f32) -> Result<ImpulseResponse, IrLoadError> {
        if (self.sample_rate - target_rate).abs() < 0.5 {
            return Ok(self.clone());
        }
        let channels = resample_offline(
            &self.channels,
            self.sample_rate as f64,
            target_rate as f64,
        )?;
        ImpulseResponse::new(channels, target_rate)
    }
}

/// Anything that can produce an impulse response from a path.
pub trait IrLoader: Send {
    fn load(&self, path: &Path, target_rate: f32) -> Result<ImpulseResponse, IrLoadError>;
}

/// Reads WAV files with hound.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavIrLoader;

impl IrLoader for WavIrLoader {
    fn load(&self, path: &Path, target_rate: f32) -> Result<ImpulseResponse, IrLoadError> {
        if !path.exists() {
            return Err(IrLoadError::NotFound(path.to_path_buf()));
        }
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let num_channels = spec.channels as usize;
        if num_channels == 0 {
            return Err(IrLoadError::InvalidFormat("WAV has no channels".into()));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let frames = interleaved.len() / num_channels;
        let mut channels = vec![Vec::with_capacity(frames); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (dst, &s) in channels.iter_mut().zip(frame.iter()) {
                dst.push(s);
            }
        }

        let ir = ImpulseResponse::new(channels, spec.sample_rate as f32)?;
        info!(
            "loaded IR {} ({} taps, {} ch, {} Hz)",
            path.display(),
            ir.len(),
            ir.num_channels(),
            ir.sample_rate()
        );
        ir.resampled(target_rate)
    }
}

/// An impulse response ready to convolve at one stream rate.
pub struct CabinetIr {
    source: ImpulseResponse,
    prepared: ImpulseResponse,
    convolvers: Vec<Convolver>,
    config: StreamConfig,
}

impl CabinetIr {
    pub fn new(source: ImpulseResponse, config: StreamConfig) -> Result<Self, IrLoadError> {
        let mut ir = Self {
            prepared: source.clone(),
            source,
            convolvers: Vec::new(),
            config,
        };
        ir.prepare(config)?;
        Ok(ir)
    }

    /// Rebuild for `config`, resampling from the loaded kernel when the rate
    /// changed. Not realtime safe.
    pub fn prepare(&mut self, config: StreamConfig) -> Result<(), IrLoadError> {
        if self.convolvers.is_empty() || config.sample_rate != self.prepared.sample_rate() {
            self.prepared = self.source.resampled(config.sample_rate)?;
            let gain = db_to_gain(IR_GAIN_DB) * IR_REFERENCE_RATE / config.sample_rate;
            self.convolvers = (0..NUM_CHANNELS)
                .map(|c| {
                    let kernel: Vec<f32> = self
                        .prepared
                        .channel(c)
                        .iter()
                        .take(MAX_IR_LENGTH)
                        .map(|h| h * gain)
                        .collect();
                    Convolver::new(&kernel)
                })
                .collect();
        } else {
            for conv in self.convolvers.iter_mut() {
                conv.reset();
            }
        }
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// The kernel as it is convolved now, before gain scaling.
    pub fn prepared(&self) -> &ImpulseResponse {
        &self.prepared
    }

    #[inline]
    pub fn process(&mut self, channel: usize, buf: &mut [f32]) {
        if let Some(conv) = self.convolvers.get_mut(channel) {
            conv.process_block(buf);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_wav(path: &Path, channels: &[Vec<f32>], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..channels[0].len() {
            for ch in channels {
                writer.write_sample(ch[i]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn decaying(len: usize) -> Vec<f32> {
        (0..len).map(|i| 0.9f32.powi(i as i32)).collect()
    }

    #[test]
    fn test_resampling_updates_rate() {
        let ir = ImpulseResponse::new(vec![decaying(4410)], 44100.0).unwrap();
        let up = ir.resampled(48000.0).unwrap();
        assert_eq!(up.sample_rate(), 48000.0);
        assert_eq!(up.len(), 4800);
        assert_eq!(ir.sample_rate(), 44100.0);
    }

    #[test]
    fn test_empty_ir_is_rejected() {
        assert!(matches!(
            ImpulseResponse::new(vec![vec![]], 48000.0),
            Err(IrLoadError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_cabinet_is_zero_latency_and_scaled() {
        let kernel = decaying(512);
        let ir = ImpulseResponse::new(vec![kernel.clone()], 48000.0).unwrap();
        let mut cab = CabinetIr::new(ir, StreamConfig::default()).unwrap();

        let mut buf = vec![0.0; 256];
        buf[0] = 1.0;
        cab.process(0, &mut buf);
        assert_eq!(buf.len(), 256);
        let gain = db_to_gain(IR_GAIN_DB);
        for i in 0..256 {
            assert!((buf[i] - kernel[i] * gain).abs() < 1e-4, "tap {i}");
        }
    }

    #[test]
    fn test_prepare_follows_rate_change() {
        let ir = ImpulseResponse::new(vec![decaying(480)], 48000.0).unwrap();
        let mut cab = CabinetIr::new(ir, StreamConfig::default()).unwrap();
        cab.prepare(StreamConfig {
            sample_rate: 96000.0,
            max_block_size: 512,
        })
        .unwrap();
        assert_eq!(cab.prepared().sample_rate(), 96000.0);
        assert_eq!(cab.prepared().len(), 960);
        assert_eq!(cab.config().sample_rate, 96000.0);
    }

    #[test]
    fn test_single_tap_survives_downsampling() {
        let ir = ImpulseResponse::new(vec![vec![1.0]], 96000.0).unwrap();
        let down = ir.resampled(44100.0).unwrap();
        assert_eq!(down.len(), 1);
        assert_eq!(down.sample_rate(), 44100.0);

        let mut cab = CabinetIr::new(ir, StreamConfig::default()).unwrap();
        cab.prepare(StreamConfig {
            sample_rate: 44100.0,
            max_block_size: 256,
        })
        .unwrap();
        assert_eq!(cab.prepared().len(), 1);
    }

    #[test]
    fn test_wav_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cab.wav");
        write_wav(&path, &[decaying(1000), decaying(1000)], 48000);

        let ir = WavIrLoader.load(&path, 48000.0).unwrap();
        assert_eq!(ir.num_channels(), 2);
        assert_eq!(ir.len(), 1000);
        assert!((ir.channel(1)[1] - 0.9).abs() < 1e-6);

        let resampled = WavIrLoader.load(&path, 44100.0).unwrap();
        assert_eq!(resampled.sample_rate(), 44100.0);

        assert!(matches!(
            WavIrLoader.load(&dir.path().join("missing.wav"), 48000.0),
            Err(IrLoadError::NotFound(_))
        ));

        let junk = dir.path().join("junk.wav");
        std::fs::write(&junk, b"RIFF nonsense").unwrap();
        assert!(matches!(
            WavIrLoader.load(&junk, 48000.0),
            Err(IrLoadError::InvalidFormat(_)) | Err(IrLoadError::Other(_))
        ));
    }
}
