//! Amp model capability, the built-in `Linear` variant, rate adaptation and
//! the factory that turns model files into ready-to-run instances.
//!
//! # Model files
//! A model file is JSON with the fields `version`, `architecture`, `config`,
//! `weights`, `sample_rate` and `metadata`. The factory looks `architecture`
//! up in its builder registry; everything else is handed to that builder.
//! `metadata` may carry `loudness`, `input_level_dbu` and `output_level_dbu`,
//! which drive output normalization and input calibration.
//!
//! # Rate adaptation
//! Every model the factory returns is wrapped in a [`ResamplingModel`]. When
//! the model declares a native rate that differs from the host rate, audio is
//! converted host -> model -> host around it and the reported latency grows by
//! the interpolation and FIFO delay.
//!
//! ## Audio Thread Safety
//! - `process()` never allocates; everything is sized in `reset()`
//! - `reset()` may allocate and must run off the audio thread

use super::StreamConfig;
use crate::dsp::resampler::CUBIC_DELAY_SAMPLES;
use crate::dsp::CubicResampler;
use crate::error::LoadError;
use log::info;
use ringbuf::{Consumer, Producer, RingBuffer};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// A neural (or any other) amp model.
///
/// Implementations are constructed and reset off the audio thread; only
/// `process` is called in realtime.
pub trait AmpModel: Send {
    /// Process `input` into `output`. Both slices have the same length.
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Prepare for a new sample rate and maximum block size, clearing state.
    fn reset(&mut self, sample_rate: f32, max_block_size: usize);

    fn latency_samples(&self) -> usize {
        0
    }

    /// Level in dBu of a full-scale input during capture, if known.
    fn input_level_dbu(&self) -> Option<f32> {
        None
    }

    /// Level in dBu of a full-scale output during capture, if known.
    fn output_level_dbu(&self) -> Option<f32> {
        None
    }

    /// Loudness of the model's output for a standard input, in dB.
    fn loudness_db(&self) -> Option<f32> {
        None
    }

    /// Rate the model was trained at. `None` means it runs at any rate.
    fn native_sample_rate(&self) -> Option<f32> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub loudness: Option<f32>,
    #[serde(default)]
    pub input_level_dbu: Option<f32>,
    #[serde(default)]
    pub output_level_dbu: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub version: Option<String>,
    pub architecture: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub weights: Vec<f32>,
    #[serde(default)]
    pub sample_rate: Option<f32>,
    #[serde(default)]
    pub metadata: Option<ModelMetadata>,
}

// =============================================================================
// Linear
// =============================================================================

#[derive(Debug, Deserialize)]
struct LinearConfig {
    receptive_field: usize,
    #[serde(default)]
    bias: bool,
}

/// FIR model: `y[n] = bias + sum_k weights[k] * x[n - k]`.
pub struct LinearModel {
    weights: Vec<f32>,
    bias: f32,
    history: Vec<f32>,
    pos: usize,
}

impl LinearModel {
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        let len = weights.len().max(1);
        Self {
            weights,
            bias,
            history: vec![0.0; 2 * len],
            pos: 0,
        }
    }

    /// Builder for the `Linear` architecture. Weights are the taps followed by
    /// the bias when `config.bias` is set.
    pub fn build(
        config: &serde_json::Value,
        weights: &[f32],
    ) -> Result<Box<dyn AmpModel>, LoadError> {
        let cfg = LinearConfig::deserialize(config)?;
        if cfg.receptive_field == 0 {
            return Err(LoadError::Invalid("receptive_field must be > 0".into()));
        }
        let needed = cfg.receptive_field + usize::from(cfg.bias);
        if weights.len() != needed {
            return Err(LoadError::Invalid(format!(
                "Linear model expects {needed} weights, file has {}",
                weights.len()
            )));
        }
        let bias = if cfg.bias {
            weights[cfg.receptive_field]
        } else {
            0.0
        };
        Ok(Box::new(LinearModel::new(
            weights[..cfg.receptive_field].to_vec(),
            bias,
        )))
    }
}

impl AmpModel for LinearModel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let len = self.weights.len();
        if len == 0 {
            output.fill(self.bias);
            return;
        }
        for (x, y) in input.iter().zip(output.iter_mut()) {
            self.pos = if self.pos == 0 { len - 1 } else { self.pos - 1 };
            self.history[self.pos] = *x;
            self.history[self.pos + len] = *x;
            let recent = &self.history[self.pos..self.pos + len];
            *y = self.bias
                + recent
                    .iter()
                    .zip(self.weights.iter())
                    .map(|(a, w)| a * w)
                    .sum::<f32>();
        }
    }

    fn reset(&mut self, _sample_rate: f32, _max_block_size: usize) {
        self.history.fill(0.0);
        self.pos = 0;
    }
}

// =============================================================================
// Rate adaptation
// =============================================================================

// Zeros queued ahead of the first converted sample
const FIFO_PRIME: usize = 2;

struct RateBridge {
    up: CubicResampler,
    down: CubicResampler,
    model_in: Vec<f32>,
    model_out: Vec<f32>,
    host_out: Vec<f32>,
    fifo_in: Producer<f32>,
    fifo_out: Consumer<f32>,
    latency: usize,
}

/// Wraps a model with its calibration metadata and runs it at its native rate.
pub struct ResamplingModel {
    inner: Box<dyn AmpModel>,
    metadata: ModelMetadata,
    native_rate: Option<f32>,
    max_block_size: usize,
    bridge: Option<RateBridge>,
}

impl ResamplingModel {
    pub fn new(
        inner: Box<dyn AmpModel>,
        metadata: ModelMetadata,
        native_rate: Option<f32>,
    ) -> Self {
        Self {
            inner,
            metadata,
            native_rate,
            max_block_size: 0,
            bridge: None,
        }
    }

    pub fn is_resampling(&self) -> bool {
        self.bridge.is_some()
    }

    fn process_chunk(
        bridge: &mut RateBridge,
        inner: &mut dyn AmpModel,
        input: &[f32],
        output: &mut [f32],
    ) {
        let n_model = bridge.up.process(input, &mut bridge.model_in);
        inner.process(
            &bridge.model_in[..n_model],
            &mut bridge.model_out[..n_model],
        );
        let n_host = bridge
            .down
            .process(&bridge.model_out[..n_model], &mut bridge.host_out);
        bridge.fifo_in.push_slice(&bridge.host_out[..n_host]);

        let popped = bridge.fifo_out.pop_slice(output);
        output[popped..].fill(0.0);
    }
}

impl AmpModel for ResamplingModel {
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let Some(bridge) = self.bridge.as_mut() else {
            self.inner.process(input, output);
            return;
        };
        let chunk = self.max_block_size.max(1);
        for (inp, out) in input.chunks(chunk).zip(output.chunks_mut(chunk)) {
            Self::process_chunk(bridge, self.inner.as_mut(), inp, out);
        }
    }

    fn reset(&mut self, sample_rate: f32, max_block_size: usize) {
        self.max_block_size = max_block_size;
        let native = match self.native_rate {
            Some(rate) if (rate - sample_rate).abs() > 0.5 => rate,
            _ => {
                self.bridge = None;
                self.inner.reset(sample_rate, max_block_size);
                return;
            }
        };

        let host = sample_rate as f64;
        let model = native as f64;
        let up = CubicResampler::new(host, model);
        let down = CubicResampler::new(model, host);
        let model_block = up.max_output_len(max_block_size);
        let host_block = down.max_output_len(model_block);
        self.inner.reset(native, model_block);

        let (fifo_in, fifo_out) =
            RingBuffer::<f32>::new(2 * max_block_size + host_block + FIFO_PRIME).split();
        let mut fifo_in = fifo_in;
        for _ in 0..FIFO_PRIME {
            let _ = fifo_in.push(0.0);
        }

        let interp_delay = CUBIC_DELAY_SAMPLES + CUBIC_DELAY_SAMPLES * host / model;
        let inner_delay = self.inner.latency_samples() as f64 * host / model;
        let latency = FIFO_PRIME + (interp_delay + inner_delay).round() as usize;

        info!(
            "model runs at {native} Hz, host at {sample_rate} Hz: resampling adds {latency} samples"
        );

        self.bridge = Some(RateBridge {
            up,
            down,
            model_in: vec![0.0; model_block],
            model_out: vec![0.0; model_block],
            host_out: vec![0.0; host_block],
            fifo_in,
            fifo_out,
            latency,
        });
    }

    fn latency_samples(&self) -> usize {
        match &self.bridge {
            Some(bridge) => bridge.latency,
            None => self.inner.latency_samples(),
        }
    }

    fn input_level_dbu(&self) -> Option<f32> {
        self.inner.input_level_dbu().or(self.metadata.input_level_dbu)
    }

    fn output_level_dbu(&self) -> Option<f32> {
        self.inner.output_level_dbu().or(self.metadata.output_level_dbu)
    }

    fn loudness_db(&self) -> Option<f32> {
        self.inner.loudness_db().or(self.metadata.loudness)
    }

    fn native_sample_rate(&self) -> Option<f32> {
        self.native_rate
    }
}

// =============================================================================
// Factory
// =============================================================================

pub type ModelBuilder =
    fn(&serde_json::Value, &[f32]) -> Result<Box<dyn AmpModel>, LoadError>;

/// Selects a model implementation from a file's `architecture` field.
pub struct ModelFactory {
    builders: HashMap<String, ModelBuilder>,
}

impl Default for ModelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            builders: HashMap::new(),
        };
        factory.register("Linear", LinearModel::build);
        factory
    }

    /// Add or replace the builder for `architecture`.
    pub fn register(&mut self, architecture: &str, builder: ModelBuilder) {
        self.builders.insert(architecture.to_string(), builder);
    }

    pub fn parse(&self, text: &str) -> Result<ModelFile, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn build(&self, file: &ModelFile) -> Result<Box<dyn AmpModel>, LoadError> {
        let builder = self
            .builders
            .get(&file.architecture)
            .ok_or_else(|| LoadError::UnsupportedArchitecture(file.architecture.clone()))?;
        let core = builder(&file.config, &file.weights)?;
        Ok(Box::new(ResamplingModel::new(
            core,
            file.metadata.clone().unwrap_or_default(),
            file.sample_rate,
        )))
    }

    /// Read `path` and build `instances` independent models from it.
    pub fn load(
        &self,
        path: &Path,
        instances: usize,
    ) -> Result<Vec<Box<dyn AmpModel>>, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let file = self.parse(&text)?;
        let models = (0..instances)
            .map(|_| self.build(&file))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "loaded {} model {} (version {})",
            file.architecture,
            path.display(),
            file.version.as_deref().unwrap_or("unknown")
        );
        Ok(models)
    }
}

// =============================================================================
// Runner
// =============================================================================

/// One model instance per internal channel, all prepared for the same stream.
pub struct ModelRunner {
    channels: Vec<Box<dyn AmpModel>>,
    config: StreamConfig,
}

impl ModelRunner {
    pub fn new(channels: Vec<Box<dyn AmpModel>>, config: StreamConfig) -> Self {
        let mut runner = Self { channels, config };
        runner.prepare(config);
        runner
    }

    /// Reset every channel for `config`. Not realtime safe.
    pub fn prepare(&mut self, config: StreamConfig) {
        for model in self.channels.iter_mut() {
            model.reset(config.sample_rate, config.max_block_size);
        }
        self.config = config;
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// Run `channel`'s model. A channel without a model passes audio through.
    #[inline]
    pub fn process(&mut self, channel: usize, input: &[f32], output: &mut [f32]) {
        match self.channels.get_mut(channel) {
            Some(model) => model.process(input, output),
            None => output.copy_from_slice(input),
        }
    }

    fn first(&self) -> Option<&dyn AmpModel> {
        self.channels.first().map(|m| m.as_ref())
    }

    pub fn latency_samples(&self) -> usize {
        self.first().map_or(0, |m| m.latency_samples())
    }

    pub fn input_level_dbu(&self) -> Option<f32> {
        self.first().and_then(|m| m.input_level_dbu())
    }

    pub fn output_level_dbu(&self) -> Option<f32> {
        self.first().and_then(|m| m.output_level_dbu())
    }

    pub fn loudness_db(&self) -> Option<f32> {
        self.first().and_then(|m| m.loudness_db())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn linear_json(weights: &[f32], sample_rate: f32, metadata: &str) -> String {
        format!(
            r#"{{"version":"0.5.4","architecture":"Linear","config":{{"receptive_field":{},"bias":false}},"weights":{:?},"sample_rate":{},"metadata":{}}}"#,
            weights.len(),
            weights,
            sample_rate,
            metadata
        )
    }

    #[test]
    fn test_linear_fir_and_bias() {
        let mut model = LinearModel::new(vec![0.5, 0.25], 0.1);
        let input = [1.0, 0.0, 0.0, 2.0];
        let mut out = [0.0; 4];
        model.process(&input, &mut out);
        let want = [0.6, 0.35, 0.1, 1.1];
        for (g, w) in out.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-6);
        }
    }

    #[test]
    fn test_linear_state_carries_across_blocks() {
        let mut model = LinearModel::new(vec![0.0, 1.0], 0.0);
        let mut out = [0.0; 1];
        model.process(&[3.0], &mut out);
        model.process(&[0.0], &mut out);
        assert_eq!(out[0], 3.0);
    }

    #[test]
    fn test_factory_builds_linear_with_metadata() {
        let factory = ModelFactory::new();
        let json = linear_json(
            &[1.0],
            48000.0,
            r#"{"loudness":-20.5,"input_level_dbu":12.0,"output_level_dbu":18.0,"name":"clean"}"#,
        );
        let file = factory.parse(&json).unwrap();
        let mut model = factory.build(&file).unwrap();
        model.reset(48000.0, 64);
        assert_eq!(model.loudness_db(), Some(-20.5));
        assert_eq!(model.input_level_dbu(), Some(12.0));
        assert_eq!(model.output_level_dbu(), Some(18.0));
        assert_eq!(model.latency_samples(), 0);

        let mut out = [0.0; 3];
        model.process(&[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_missing_metadata_reports_unknown() {
        let factory = ModelFactory::new();
        let file = factory.parse(&linear_json(&[1.0], 48000.0, "null")).unwrap();
        let model = factory.build(&file).unwrap();
        assert_eq!(model.loudness_db(), None);
        assert_eq!(model.input_level_dbu(), None);
    }

    #[test]
    fn test_unsupported_architecture() {
        let factory = ModelFactory::new();
        let file = factory
            .parse(r#"{"architecture":"WaveNet","config":{},"weights":[]}"#)
            .unwrap();
        assert!(matches!(
            factory.build(&file),
            Err(LoadError::UnsupportedArchitecture(name)) if name == "WaveNet"
        ));
    }

    #[test]
    fn test_registered_builder_is_used() {
        fn silent(_: &serde_json::Value, _: &[f32]) -> Result<Box<dyn AmpModel>, LoadError> {
            Ok(Box::new(LinearModel::new(vec![0.0], 0.0)))
        }
        let mut factory = ModelFactory::new();
        factory.register("Silent", silent);
        let file = factory
            .parse(r#"{"architecture":"Silent","weights":[]}"#)
            .unwrap();
        let mut model = factory.build(&file).unwrap();
        let mut out = [1.0; 2];
        model.process(&[0.5, 0.5], &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_weight_count_is_checked() {
        let factory = ModelFactory::new();
        let file = factory
            .parse(r#"{"architecture":"Linear","config":{"receptive_field":3,"bias":true},"weights":[1.0,2.0,3.0]}"#)
            .unwrap();
        assert!(matches!(factory.build(&file), Err(LoadError::Invalid(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let factory = ModelFactory::new();
        let missing = factory.load(Path::new("/definitely/not/here.nam"), 2);
        assert!(matches!(missing, Err(LoadError::NotFound(_))));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"not json").unwrap();
        assert!(matches!(
            factory.load(garbage.path(), 2),
            Err(LoadError::Parse(_))
        ));

        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(linear_json(&[1.0, 0.5], 48000.0, "{}").as_bytes())
            .unwrap();
        let models = factory.load(good.path(), 2).unwrap();
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn test_resampling_model_delays_by_reported_latency() {
        let inner = Box::new(LinearModel::new(vec![1.0], 0.0));
        let mut model = ResamplingModel::new(inner, ModelMetadata::default(), Some(48000.0));
        model.reset(44100.0, 128);
        assert!(model.is_resampling());
        let latency = model.latency_samples();
        assert_eq!(latency, FIFO_PRIME + 4);

        let sr = 44100.0;
        let input: Vec<f32> = (0..44100)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / sr).sin() * 0.5)
            .collect();
        let mut output = vec![0.0; input.len()];
        for (inp, out) in input.chunks(128).zip(output.chunks_mut(128)) {
            model.process(inp, out);
        }
        for n in 1000..input.len() {
            assert!(
                (output[n] - input[n - latency]).abs() < 0.02,
                "sample {n}: {} vs {}",
                output[n],
                input[n - latency]
            );
        }
    }

    #[test]
    fn test_matching_rate_skips_resampling() {
        let inner = Box::new(LinearModel::new(vec![1.0], 0.0));
        let mut model = ResamplingModel::new(inner, ModelMetadata::default(), Some(48000.0));
        model.reset(48000.0, 256);
        assert!(!model.is_resampling());
        assert_eq!(model.latency_samples(), 0);
    }

    #[test]
    fn test_runner_keeps_channels_independent() {
        let channels: Vec<Box<dyn AmpModel>> = vec![
            Box::new(LinearModel::new(vec![0.0, 1.0], 0.0)),
            Box::new(LinearModel::new(vec![0.0, 1.0], 0.0)),
        ];
        let mut runner = ModelRunner::new(channels, StreamConfig::default());
        let mut out = [0.0; 1];
        runner.process(0, &[1.0], &mut out);
        runner.process(1, &[0.0], &mut out);
        // Right channel must not see the left channel's previous sample
        assert_eq!(out[0], 0.0);
        runner.process(0, &[0.0], &mut out);
        assert_eq!(out[0], 1.0);
    }
}
