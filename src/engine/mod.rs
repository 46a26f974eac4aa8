//! The realtime rig: model and IR staging, A/B slots, gain calibration and the
//! per-block pipeline that ties the DSP stages together.

pub mod gain;
pub mod ir;
pub mod model;
pub mod pipeline;
pub mod slots;
pub mod staging;

pub use gain::GainStage;
pub use ir::{CabinetIr, ImpulseResponse, IrLoader, WavIrLoader};
pub use model::{AmpModel, LinearModel, ModelFactory, ModelMetadata, ModelRunner, ResamplingModel};
pub use pipeline::{BlockReport, Pipeline, PipelineSettings};
pub use slots::SlotBank;
pub use staging::Controller;

/// Internal channel count. External layouts are mapped onto this.
pub const NUM_CHANNELS: usize = 2;

/// What a model or IR was prepared for. Objects prepared for a different
/// configuration are never made active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 512,
        }
    }
}
