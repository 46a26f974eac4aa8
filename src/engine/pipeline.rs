//! The per-block signal chain.
//!
//! ```text
//! input gain -> gate -> model (A, B or A/B blend) -> gate envelope
//!   -> tone stack -> cabinet IR -> DC blocker -> output gain -> host
//! ```
//!
//! Every stage runs per channel with its own state and identical settings.
//! Staged models and IRs are taken over only at the top of a block.
//!
//! ## Audio Thread Safety
//! - `process()` and `process_in_place()` never lock and never free a model
//!   or IR; replaced objects go back to the [`Controller`]
//! - buffers are sized in `reset()`; a host block larger than announced grows
//!   them once under `permit_alloc`

use super::gain::GainInputs;
use super::staging::{Command, Retired, SharedConfig, COMMAND_CAPACITY, RETIRE_CAPACITY};
use super::{
    Controller, GainStage, IrLoader, ModelFactory, SlotBank, StreamConfig, WavIrLoader,
    NUM_CHANNELS,
};
use crate::dsp::utils::{apply_envelope, apply_gain, crossfade, gain_to_db, peak_abs};
use crate::dsp::{DcBlocker, DenormalGuard, GateParams, GateTrigger, ToneBands, ToneKnobs, ToneStack};
use crate::error::ConfigurationError;
use crate::meters::Meters;
use crate::presets::{AbSlot, HostKind, OutputMode, ProcessingMode};
use crate::rig_log;
use assert_no_alloc::permit_alloc;
use ebur128::{EbuR128, Mode};
use log::{info, warn};
use ringbuf::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameter snapshot, read once per block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub input_level_db: f32,
    pub output_level_db: f32,
    pub output_mode: OutputMode,
    pub calibrate_input: bool,
    pub input_calibration_level_dbu: f32,
    pub gate_enabled: bool,
    pub gate_threshold_db: f32,
    pub tone_stack_enabled: bool,
    pub bass: f32,
    pub middle: f32,
    pub treble: f32,
    pub ir_enabled: bool,
    pub processing_mode: ProcessingMode,
    pub slot: AbSlot,
    pub ab_mix: f32,
    pub host: HostKind,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            input_level_db: 0.0,
            output_level_db: 0.0,
            output_mode: OutputMode::Normalized,
            calibrate_input: false,
            input_calibration_level_dbu: 12.0,
            gate_enabled: true,
            gate_threshold_db: -80.0,
            tone_stack_enabled: true,
            bass: 5.0,
            middle: 5.0,
            treble: 5.0,
            ir_enabled: true,
            processing_mode: ProcessingMode::Guitar,
            slot: AbSlot::A,
            ab_mix: 0.0,
            host: HostKind::Hosted,
        }
    }
}

impl PipelineSettings {
    fn knobs(&self) -> ToneKnobs {
        ToneKnobs {
            bass: self.bass,
            middle: self.middle,
            treble: self.treble,
        }
    }

    /// Blend both slots only strictly inside (0, 1).
    fn wants_blend(&self) -> bool {
        self.ab_mix > 0.0 && self.ab_mix < 1.0
    }
}

/// What happened during one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockReport {
    pub frames: usize,
    pub latency_samples: usize,
    /// A staged model or IR was taken over at the top of this block.
    pub swapped: bool,
    pub input_peak: f32,
    pub output_peak: f32,
    /// Momentary output loudness in LUFS, once enough audio has been seen.
    pub loudness: Option<f32>,
    /// Replaced objects are waiting for [`Controller::poll`].
    pub needs_service: bool,
}

struct Buffers {
    input: [Vec<f32>; NUM_CHANNELS],
    envelope: [Vec<f32>; NUM_CHANNELS],
    output: [Vec<f32>; NUM_CHANNELS],
    blend: [Vec<f32>; NUM_CHANNELS],
    frames: usize,
}

impl Buffers {
    fn new(capacity: usize) -> Self {
        Self {
            input: std::array::from_fn(|_| vec![0.0; capacity]),
            envelope: std::array::from_fn(|_| vec![1.0; capacity]),
            output: std::array::from_fn(|_| vec![0.0; capacity]),
            blend: std::array::from_fn(|_| vec![0.0; capacity]),
            frames: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.input[0].len()
    }

    fn prepare(&mut self, frames: usize) {
        if frames > self.capacity() {
            rig_log!("block of {} frames exceeds buffers, growing", frames);
            permit_alloc(|| *self = Buffers::new(frames));
        }
        if frames != self.frames {
            for c in 0..NUM_CHANNELS {
                self.input[c][..frames].fill(0.0);
                self.envelope[c][..frames].fill(1.0);
                self.output[c][..frames].fill(0.0);
                self.blend[c][..frames].fill(0.0);
            }
            self.frames = frames;
        }
    }
}

pub struct Pipeline {
    config: StreamConfig,
    shared: Arc<SharedConfig>,
    commands: Consumer<Command>,
    retired: Producer<Retired>,
    slots: SlotBank,
    gain: GainStage,
    gates: [GateTrigger; NUM_CHANNELS],
    tone: [ToneStack; NUM_CHANNELS],
    dc: [DcBlocker; NUM_CHANNELS],
    buffers: Buffers,
    latency: usize,
    selected: AbSlot,
    loudness: Option<EbuR128>,
    meters: Arc<Meters>,
}

impl Pipeline {
    /// A pipeline and its controller, using the built-in model factory and
    /// WAV IR loader.
    pub fn new() -> (Pipeline, Controller) {
        Self::with_loaders(ModelFactory::new(), Box::new(WavIrLoader))
    }

    pub fn with_loaders(
        factory: ModelFactory,
        ir_loader: Box<dyn IrLoader>,
    ) -> (Pipeline, Controller) {
        let config = StreamConfig::default();
        let shared = Arc::new(SharedConfig::new(config));
        let (command_tx, command_rx) = RingBuffer::<Command>::new(COMMAND_CAPACITY).split();
        let (retire_tx, retire_rx) = RingBuffer::<Retired>::new(RETIRE_CAPACITY).split();

        let bands = ProcessingMode::default().profile().bands;
        let mut pipeline = Pipeline {
            config,
            shared: shared.clone(),
            commands: command_rx,
            retired: retire_tx,
            slots: SlotBank::new(),
            gain: GainStage::new(),
            gates: std::array::from_fn(|_| GateTrigger::new(config.sample_rate)),
            tone: std::array::from_fn(|_| ToneStack::new(bands, config.sample_rate)),
            dc: std::array::from_fn(|_| DcBlocker::new(config.sample_rate)),
            buffers: Buffers::new(config.max_block_size),
            latency: 0,
            selected: AbSlot::A,
            loudness: None,
            meters: Arc::new(Meters::new()),
        };
        pipeline.reset(config.sample_rate, config.max_block_size);

        let controller = Controller::new(command_tx, retire_rx, factory, ir_loader, shared);
        (pipeline, controller)
    }

    /// Prepare for a new stream. Pending hand-offs are taken over and
    /// prepared for the new configuration. Not realtime safe.
    pub fn reset(&mut self, sample_rate: f32, max_block_size: usize) {
        let config = StreamConfig {
            sample_rate,
            max_block_size: max_block_size.max(1),
        };
        self.config = config;
        self.shared.store(config);
        self.slots.prepare(config);

        while let Some(command) = self.commands.pop() {
            match command {
                Command::StageModel(slot, mut runner) => {
                    runner.prepare(config);
                    self.slots.replace_model(slot, Some(runner));
                }
                Command::StageIr(slot, mut ir) => match ir.prepare(config) {
                    Ok(()) => {
                        self.slots.replace_ir(slot, Some(ir));
                    }
                    Err(e) => warn!("dropping staged IR for slot {}: {e}", slot.name()),
                },
                Command::RemoveModel(slot) => {
                    self.slots.replace_model(slot, None);
                }
                Command::RemoveIr(slot) => {
                    self.slots.replace_ir(slot, None);
                }
            }
        }

        let bands = self.tone[0].bands();
        for c in 0..NUM_CHANNELS {
            self.gates[c].set_sample_rate(sample_rate);
            self.tone[c] = ToneStack::new(bands, sample_rate);
            self.dc[c].set_sample_rate(sample_rate);
        }
        self.buffers = Buffers::new(config.max_block_size);
        self.loudness = EbuR128::new(NUM_CHANNELS as u32, sample_rate as u32, Mode::M).ok();
        self.gain.invalidate();
        self.latency = self.model_latency(self.selected);
        self.meters.reset();
        self.meters.set_latency_samples(self.latency as u32);

        info!(
            "pipeline reset: {} Hz, max block {}, latency {}",
            sample_rate, config.max_block_size, self.latency
        );
    }

    /// Clear filter and detector state without reallocating. Safe to call
    /// from the audio thread; models keep their state.
    pub fn clear_state(&mut self) {
        for c in 0..NUM_CHANNELS {
            self.gates[c].reset();
            self.tone[c].reset();
            self.dc[c].reset();
        }
        self.meters.reset();
        self.meters.set_latency_samples(self.latency as u32);
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn latency_samples(&self) -> usize {
        self.latency
    }

    /// How long the output keeps ringing after the input stops.
    pub fn tail_samples(&self) -> u32 {
        DcBlocker::tail_samples(self.config.sample_rate)
    }

    pub fn tone_bands(&self) -> ToneBands {
        self.tone[0].bands()
    }

    pub fn gain(&self) -> &GainStage {
        &self.gain
    }

    pub fn meters(&self) -> Arc<Meters> {
        self.meters.clone()
    }

    pub fn has_model(&self, slot: AbSlot) -> bool {
        self.slots.has_model(slot)
    }

    pub fn has_ir(&self, slot: AbSlot) -> bool {
        self.slots.slot(slot).ir.is_some()
    }

    /// Process `input` into stereo `output`. A mono input feeds both
    /// channels; input channels past the second are ignored.
    pub fn process(
        &mut self,
        settings: &PipelineSettings,
        input: &[&[f32]],
        output: &mut [&mut [f32]],
    ) -> Result<BlockReport, ConfigurationError> {
        let _denormals = DenormalGuard::new();

        if output.len() != NUM_CHANNELS {
            return Err(ConfigurationError::OutputChannels(output.len()));
        }
        if input.is_empty() {
            return Err(ConfigurationError::NoInputChannels);
        }
        let frames = output[0].len();
        check_frames(input, frames)?;
        check_frames(output, frames)?;

        let input_peak = input.iter().map(|c| peak_abs(c)).fold(0.0, f32::max);
        let swapped = self.begin_block(settings, frames);
        self.load_input(input, frames);
        self.run_chain(settings, frames);
        let output_peak = self.write_output(settings, output, frames);
        Ok(self.finish_block(frames, swapped, input_peak, output_peak))
    }

    /// Process stereo `buffers` in place. The first `input_channels` buffers
    /// carry the input; any others are output only.
    pub fn process_in_place(
        &mut self,
        settings: &PipelineSettings,
        buffers: &mut [&mut [f32]],
        input_channels: usize,
    ) -> Result<BlockReport, ConfigurationError> {
        let _denormals = DenormalGuard::new();

        if buffers.len() != NUM_CHANNELS {
            return Err(ConfigurationError::OutputChannels(buffers.len()));
        }
        if input_channels == 0 {
            return Err(ConfigurationError::NoInputChannels);
        }
        let frames = buffers[0].len();
        check_frames(buffers, frames)?;

        let inputs = &buffers[..input_channels.min(NUM_CHANNELS)];
        let input_peak = inputs.iter().map(|c| peak_abs(c)).fold(0.0, f32::max);
        let swapped = self.begin_block(settings, frames);
        self.load_input(&buffers[..input_channels.min(NUM_CHANNELS)], frames);
        self.run_chain(settings, frames);
        let output_peak = self.write_output(settings, buffers, frames);
        Ok(self.finish_block(frames, swapped, input_peak, output_peak))
    }

    // -------------------------------------------------------------------------

    /// Take over staged objects, then bring gain, tone stack and latency up
    /// to date. Returns whether anything was swapped in.
    fn begin_block(&mut self, settings: &PipelineSettings, frames: usize) -> bool {
        self.buffers.prepare(frames);
        let swapped = self.apply_staging();

        let slot_changed = settings.slot != self.selected;
        self.selected = settings.slot;
        if swapped || slot_changed {
            self.latency = self.model_latency(self.selected);
            self.gain.invalidate();
        }

        let profile = settings.processing_mode.profile();
        let model = self.slots.slot(self.selected).model.as_deref();
        self.gain.update(GainInputs {
            input_level_db: profile.input_level.clamp(settings.input_level_db),
            output_level_db: profile.output_level.clamp(settings.output_level_db),
            output_mode: settings.output_mode,
            calibrate_input: settings.calibrate_input,
            calibration_level_dbu: settings.input_calibration_level_dbu,
            model_input_level_dbu: model.and_then(|m| m.input_level_dbu()),
            model_output_level_dbu: model.and_then(|m| m.output_level_dbu()),
            model_loudness_db: model.and_then(|m| m.loudness_db()),
        });

        let knobs = settings.knobs();
        for tone in self.tone.iter_mut() {
            tone.configure(profile.bands, knobs, self.config.sample_rate);
        }
        swapped
    }

    fn apply_staging(&mut self) -> bool {
        let mut swapped = false;
        while let Some(command) = self.commands.pop() {
            match command {
                Command::StageModel(slot, runner) => {
                    if runner.config() != self.config {
                        self.meters.count_stale_load();
                        self.retire(Retired::StaleModel(slot, runner));
                        continue;
                    }
                    if let Some(old) = self.slots.replace_model(slot, Some(runner)) {
                        self.retire(Retired::Model(old));
                    }
                    swapped = true;
                }
                Command::StageIr(slot, ir) => {
                    if ir.config() != self.config {
                        self.meters.count_stale_load();
                        self.retire(Retired::StaleIr(slot, ir));
                        continue;
                    }
                    if let Some(old) = self.slots.replace_ir(slot, Some(ir)) {
                        self.retire(Retired::Ir(old));
                    }
                    swapped = true;
                }
                Command::RemoveModel(slot) => {
                    if let Some(old) = self.slots.replace_model(slot, None) {
                        self.retire(Retired::Model(old));
                        swapped = true;
                    }
                }
                Command::RemoveIr(slot) => {
                    if let Some(old) = self.slots.replace_ir(slot, None) {
                        self.retire(Retired::Ir(old));
                        swapped = true;
                    }
                }
            }
        }
        swapped
    }

    fn retire(&mut self, item: Retired) {
        if let Err(item) = self.retired.push(item) {
            rig_log!("retire queue full, freeing on the audio thread");
            self.meters.count_audio_thread_drop();
            permit_alloc(|| drop(item));
        }
    }

    fn model_latency(&self, slot: AbSlot) -> usize {
        self.slots
            .slot(slot)
            .model
            .as_ref()
            .map_or(0, |m| m.latency_samples())
    }

    fn load_input<S: AsRef<[f32]>>(&mut self, input: &[S], frames: usize) {
        let gain = self.gain.input_gain();
        let last = input.len() - 1;
        for c in 0..NUM_CHANNELS {
            let src = &input[c.min(last)].as_ref()[..frames];
            for (dst, x) in self.buffers.input[c][..frames].iter_mut().zip(src) {
                *dst = x * gain;
            }
        }
    }

    fn run_chain(&mut self, settings: &PipelineSettings, frames: usize) {
        let profile = settings.processing_mode.profile();
        let bufs = &mut self.buffers;

        if settings.gate_enabled {
            let params = GateParams::with_threshold(
                profile.gate_threshold.clamp(settings.gate_threshold_db),
            );
            for c in 0..NUM_CHANNELS {
                let input = &mut bufs.input[c][..frames];
                let envelope = &mut bufs.envelope[c][..frames];
                self.gates[c].process(input, &params, envelope);
                apply_envelope(input, envelope);
            }
        }

        let mut blended = false;
        if settings.wants_blend() {
            if let Some((a, b)) = self.slots.both_models() {
                for c in 0..NUM_CHANNELS {
                    let input = &bufs.input[c][..frames];
                    let out = &mut bufs.output[c][..frames];
                    let alt = &mut bufs.blend[c][..frames];
                    a.process(c, input, out);
                    b.process(c, input, alt);
                    for (o, x) in out.iter_mut().zip(alt.iter()) {
                        *o = crossfade(*o, *x, settings.ab_mix);
                    }
                }
                blended = true;
            }
        }
        if !blended {
            match self.slots.slot_mut(self.selected).model.as_deref_mut() {
                Some(model) => {
                    for c in 0..NUM_CHANNELS {
                        model.process(c, &bufs.input[c][..frames], &mut bufs.output[c][..frames]);
                    }
                }
                None => {
                    for c in 0..NUM_CHANNELS {
                        bufs.output[c][..frames].copy_from_slice(&bufs.input[c][..frames]);
                    }
                }
            }
        }

        for c in 0..NUM_CHANNELS {
            let out = &mut bufs.output[c][..frames];
            if settings.gate_enabled {
                apply_envelope(out, &bufs.envelope[c][..frames]);
            }
            if settings.tone_stack_enabled {
                self.tone[c].process_block(out);
            }
            if settings.ir_enabled {
                if let Some(ir) = self.slots.slot_mut(self.selected).ir.as_deref_mut() {
                    ir.process(c, out);
                }
            }
            self.dc[c].process_block(out);
            apply_gain(out, self.gain.output_gain());
        }
    }

    fn write_output(
        &mut self,
        settings: &PipelineSettings,
        output: &mut [&mut [f32]],
        frames: usize,
    ) -> f32 {
        let clamp = settings.host == HostKind::Standalone;
        let mut peak = 0.0f32;
        for (c, dst) in output.iter_mut().enumerate() {
            let src = &self.buffers.output[c][..frames];
            for (d, s) in dst[..frames].iter_mut().zip(src) {
                *d = if clamp { s.clamp(-1.0, 1.0) } else { *s };
            }
            peak = peak.max(peak_abs(&dst[..frames]));
        }
        peak
    }

    fn finish_block(
        &mut self,
        frames: usize,
        swapped: bool,
        input_peak: f32,
        output_peak: f32,
    ) -> BlockReport {
        let loudness = match self.loudness.as_mut() {
            Some(meter) => {
                let planes = [
                    &self.buffers.output[0][..frames],
                    &self.buffers.output[1][..frames],
                ];
                let _ = meter.add_frames_planar_f32(&planes);
                meter
                    .loudness_momentary()
                    .ok()
                    .map(|l| l as f32)
                    .filter(|l| l.is_finite())
            }
            None => None,
        };

        self.meters.set_input_peak_db(gain_to_db(input_peak));
        self.meters.set_output_peak_db(gain_to_db(output_peak));
        self.meters.set_latency_samples(self.latency as u32);
        self.meters.set_active_slot(self.selected);
        if let Some(lufs) = loudness {
            self.meters.set_loudness_lufs(lufs);
        }

        BlockReport {
            frames,
            latency_samples: self.latency,
            swapped,
            input_peak,
            output_peak,
            loudness,
            needs_service: !self.retired.is_empty(),
        }
    }
}

fn check_frames<S: AsRef<[f32]>>(channels: &[S], frames: usize) -> Result<(), ConfigurationError> {
    for (channel, buf) in channels.iter().enumerate() {
        let actual = buf.as_ref().len();
        if actual != frames {
            return Err(ConfigurationError::FrameMismatch {
                channel,
                expected: frames,
                actual,
            });
        }
    }
    Ok(())
}
