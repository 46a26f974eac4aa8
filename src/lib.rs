pub mod debug;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod meters;
pub mod presets;

use crate::engine::{Controller, Pipeline, PipelineSettings};
use crate::meters::Meters;
use crate::presets::{AbSlot, HostKind, OutputMode, ProcessingMode};
use log::warn;
use nih_plug::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

// Helper to format values as "50%" for the DAW display
fn format_percent(v: f32) -> String {
    format!("{:.0}%", v * 100.0)
}

// Helper to format gain in dB
fn format_db(v: f32) -> String {
    format!("{:.1} dB", v)
}

fn format_dbu(v: f32) -> String {
    format!("{:.1} dBu", v)
}

fn format_knob(v: f32) -> String {
    format!("{:.1}", v)
}

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct RigParams {
    // Source files per slot, restored on initialize
    #[persist = "model-path-a"]
    pub model_path_a: RwLock<Option<String>>,
    #[persist = "model-path-b"]
    pub model_path_b: RwLock<Option<String>>,
    #[persist = "ir-path-a"]
    pub ir_path_a: RwLock<Option<String>>,
    #[persist = "ir-path-b"]
    pub ir_path_b: RwLock<Option<String>>,

    #[id = "input_level"]
    pub input_level: FloatParam,

    #[id = "output_level"]
    pub output_level: FloatParam,

    #[id = "noise_gate_threshold"]
    pub noise_gate_threshold: FloatParam,

    #[id = "noise_gate_active"]
    pub noise_gate_active: BoolParam,

    // -------------------------------------------------------------------------
    // TONE STACK
    // -------------------------------------------------------------------------
    #[id = "eq_active"]
    pub eq_active: BoolParam,

    #[id = "bass"]
    pub bass: FloatParam,

    #[id = "middle"]
    pub middle: FloatParam,

    #[id = "treble"]
    pub treble: FloatParam,

    #[id = "ir_toggle"]
    pub ir_toggle: BoolParam,

    // -------------------------------------------------------------------------
    // CALIBRATION
    // -------------------------------------------------------------------------
    #[id = "output_mode"]
    pub output_mode: EnumParam<OutputMode>,

    #[id = "calibrate_input"]
    pub calibrate_input: BoolParam,

    #[id = "input_calibration_level"]
    pub input_calibration_level: FloatParam,

    // -------------------------------------------------------------------------
    // A/B
    // -------------------------------------------------------------------------
    #[id = "ab_slot"]
    pub ab_slot: EnumParam<AbSlot>,

    #[id = "ab_mix"]
    pub ab_mix: FloatParam,

    #[id = "processing_mode"]
    pub processing_mode: EnumParam<ProcessingMode>,
}

/// Which persisted path a load belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Asset {
    Model,
    Ir,
}

impl RigParams {
    fn path_field(&self, asset: Asset, slot: AbSlot) -> &RwLock<Option<String>> {
        match (asset, slot) {
            (Asset::Model, AbSlot::A) => &self.model_path_a,
            (Asset::Model, AbSlot::B) => &self.model_path_b,
            (Asset::Ir, AbSlot::A) => &self.ir_path_a,
            (Asset::Ir, AbSlot::B) => &self.ir_path_b,
        }
    }

    fn stored_path(&self, asset: Asset, slot: AbSlot) -> Option<PathBuf> {
        self.path_field(asset, slot)
            .read()
            .ok()
            .and_then(|p| p.as_ref().map(PathBuf::from))
    }

    /// Snapshot for one block.
    fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            input_level_db: self.input_level.value(),
            output_level_db: self.output_level.value(),
            output_mode: self.output_mode.value(),
            calibrate_input: self.calibrate_input.value(),
            input_calibration_level_dbu: self.input_calibration_level.value(),
            gate_enabled: self.noise_gate_active.value(),
            gate_threshold_db: self.noise_gate_threshold.value(),
            tone_stack_enabled: self.eq_active.value(),
            bass: self.bass.value(),
            middle: self.middle.value(),
            treble: self.treble.value(),
            ir_enabled: self.ir_toggle.value(),
            processing_mode: self.processing_mode.value(),
            slot: self.ab_slot.value(),
            ab_mix: self.ab_mix.value(),
            host: HostKind::Hosted,
        }
    }
}

fn tone_knob(name: &str) -> FloatParam {
    FloatParam::new(name, 5.0, FloatRange::Linear { min: 0.0, max: 10.0 })
        .with_step_size(0.1)
        .with_value_to_string(Arc::new(format_knob))
}

impl Default for RigParams {
    fn default() -> Self {
        Self {
            model_path_a: RwLock::new(None),
            model_path_b: RwLock::new(None),
            ir_path_a: RwLock::new(None),
            ir_path_b: RwLock::new(None),

            // Widest range of any processing mode; the engine narrows it
            input_level: FloatParam::new(
                "Input",
                0.0,
                FloatRange::Linear {
                    min: -30.0,
                    max: 30.0,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),

            output_level: FloatParam::new(
                "Output",
                0.0,
                FloatRange::Linear {
                    min: -40.0,
                    max: 40.0,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),

            noise_gate_threshold: FloatParam::new(
                "Threshold",
                -80.0,
                FloatRange::Linear {
                    min: -100.0,
                    max: 0.0,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_db)),

            noise_gate_active: BoolParam::new("Noise Gate", true),
            eq_active: BoolParam::new("EQ", true),
            bass: tone_knob("Bass"),
            middle: tone_knob("Middle"),
            treble: tone_knob("Treble"),
            ir_toggle: BoolParam::new("IR", true),

            output_mode: EnumParam::new("Output Mode", OutputMode::Normalized),
            calibrate_input: BoolParam::new("Calibrate Input", false),
            input_calibration_level: FloatParam::new(
                "Input Calibration Level",
                12.0,
                FloatRange::Linear {
                    min: -60.0,
                    max: 60.0,
                },
            )
            .with_step_size(0.1)
            .with_value_to_string(Arc::new(format_dbu)),

            ab_slot: EnumParam::new("A/B Slot", AbSlot::A),
            ab_mix: FloatParam::new("A/B Mix", 0.0, FloatRange::Linear { min: 0.0, max: 1.0 })
                .with_step_size(0.01)
                .with_value_to_string(Arc::new(format_percent)),
            processing_mode: EnumParam::new("Mode", ProcessingMode::Guitar),
        }
    }
}

// -----------------------------------------------------------------------------
// BACKGROUND TASKS
// -----------------------------------------------------------------------------

/// Work the audio thread hands to the background executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigTask {
    /// Collect replaced objects and reload stale ones.
    Poll,
}

fn run_task(controller: &Mutex<Controller>, task: RigTask) {
    let Ok(mut ctl) = controller.lock() else {
        warn!("controller lock poisoned, dropping {task:?}");
        return;
    };
    match task {
        RigTask::Poll => {
            ctl.poll();
        }
    }
    crate::debug::flush();
}

/// Trips on the first panic inside a block. Once tripped, every block is
/// silenced until the next `initialize` rebuilds the pipeline.
#[derive(Debug, Default, Clone, Copy)]
struct FaultLatch {
    tripped: bool,
}

impl FaultLatch {
    fn run<F>(&mut self, channels: &mut [&mut [f32]], block: F) -> ProcessStatus
    where
        F: FnOnce(&mut [&mut [f32]]) -> ProcessStatus,
    {
        if !self.tripped {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| block(&mut *channels))) {
                Ok(status) => return status,
                Err(_) => {
                    self.tripped = true;
                    crate::rig_log!("panic during processing, output muted until re-initialized");
                }
            }
        }
        for channel in channels.iter_mut() {
            channel.fill(0.0);
        }
        ProcessStatus::Error("processing failed")
    }

    fn clear(&mut self) {
        self.tripped = false;
    }
}

// -----------------------------------------------------------------------------
// PLUGIN STRUCT
// -----------------------------------------------------------------------------
pub struct NamRig {
    params: Arc<RigParams>,
    pipeline: Pipeline,
    controller: Arc<Mutex<Controller>>,
    meters: Arc<Meters>,
    input_channels: usize,
    reported_latency: usize,
    fault: FaultLatch,
}

impl Default for NamRig {
    fn default() -> Self {
        let (pipeline, controller) = Pipeline::new();
        let meters = pipeline.meters();
        Self {
            params: Arc::new(RigParams::default()),
            pipeline,
            controller: Arc::new(Mutex::new(controller)),
            meters,
            input_channels: 2,
            reported_latency: 0,
            fault: FaultLatch::default(),
        }
    }
}

impl NamRig {
    pub fn meters(&self) -> Arc<Meters> {
        self.meters.clone()
    }

    /// Bring the slots in line with the saved state: load paths that are not
    /// loaded yet and clear slots whose path was emptied.
    fn restore_slots(&mut self) {
        let Ok(mut ctl) = self.controller.lock() else {
            return;
        };
        for slot in AbSlot::ALL {
            match self.params.stored_path(Asset::Model, slot) {
                Some(path) if ctl.model_path(slot) != Some(path.as_path()) => {
                    if let Err(e) = ctl.load_model(slot, &path) {
                        warn!("could not restore model for slot {}: {e}", slot.name());
                    }
                }
                None if ctl.model_path(slot).is_some() => {
                    ctl.remove_model(slot);
                }
                _ => {}
            }
            match self.params.stored_path(Asset::Ir, slot) {
                Some(path) if ctl.ir_path(slot) != Some(path.as_path()) => {
                    if let Err(e) = ctl.load_ir(slot, &path) {
                        warn!("could not restore IR for slot {}: {e}", slot.name());
                    }
                }
                None if ctl.ir_path(slot).is_some() => {
                    ctl.remove_ir(slot);
                }
                _ => {}
            }
        }
    }
}

impl Plugin for NamRig {
    const NAME: &'static str = "NAM Rig";
    const VENDOR: &'static str = "Andrzej Marczewski";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = RigTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::ring::init();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.input_channels = audio_io_layout
                .main_input_channels
                .map_or(2, |n| n.get() as usize);
            self.pipeline.reset(
                buffer_config.sample_rate,
                buffer_config.max_buffer_size as usize,
            );
            self.restore_slots();
            self.fault.clear();

            self.reported_latency = self.pipeline.latency_samples();
            context.set_latency_samples(self.reported_latency as u32);

            crate::debug::flush();
            true
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let controller = self.controller.clone();
        Box::new(move |task| run_task(&controller, task))
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let mut fault = self.fault;
        let status = fault.run(buffer.as_slice(), |channels| {
            self.process_internal(channels, context)
        });
        self.fault = fault;
        status
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.pipeline.clear_state();
        }))
        .unwrap_or(());
    }
}

impl NamRig {
    fn process_internal(
        &mut self,
        channels: &mut [&mut [f32]],
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let settings = self.params.settings();
        let report =
            match self
                .pipeline
                .process_in_place(&settings, channels, self.input_channels)
            {
                Ok(report) => report,
                Err(e) => {
                    crate::rig_log!("block rejected: {}", e);
                    return ProcessStatus::Error("unsupported channel layout");
                }
            };

        if report.latency_samples != self.reported_latency {
            self.reported_latency = report.latency_samples;
            context.set_latency_samples(report.latency_samples as u32);
        }
        if report.needs_service {
            context.execute_background(RigTask::Poll);
        }
        ProcessStatus::Tail(self.pipeline.tail_samples())
    }
}

impl ClapPlugin for NamRig {
    const CLAP_ID: &'static str = "com.andrzej.namrig";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Neural amp model rig");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Stereo,
        ClapFeature::Distortion,
    ];
}

impl Vst3Plugin for NamRig {
    const VST3_CLASS_ID: [u8; 16] = *b"NamRigAmpModeler";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Distortion];
}

nih_export_clap!(NamRig);
nih_export_vst3!(NamRig);
