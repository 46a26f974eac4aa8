//! Input/output gain with model calibration.

use crate::dsp::utils::db_to_gain;
use crate::presets::OutputMode;

/// Normalized output mode brings every model to this loudness.
pub const TARGET_LOUDNESS_DB: f32 = -18.0;

/// Input gain in dB. With calibration on, the interface level is mapped onto
/// the level the model was captured at, when the model knows it.
pub fn input_gain_db(
    input_level_db: f32,
    calibrate: bool,
    calibration_level_dbu: f32,
    model_input_level_dbu: Option<f32>,
) -> f32 {
    match model_input_level_dbu {
        Some(model_level) if calibrate => input_level_db + calibration_level_dbu - model_level,
        _ => input_level_db,
    }
}

/// Output gain in dB for `mode`. Offsets that need an unknown model value are
/// skipped.
pub fn output_gain_db(
    output_level_db: f32,
    mode: OutputMode,
    model_loudness_db: Option<f32>,
    model_output_level_dbu: Option<f32>,
    calibration_level_dbu: f32,
) -> f32 {
    let offset = match mode {
        OutputMode::Raw => 0.0,
        OutputMode::Normalized => model_loudness_db.map_or(0.0, |l| TARGET_LOUDNESS_DB - l),
        OutputMode::Calibrated => {
            model_output_level_dbu.map_or(0.0, |l| l - calibration_level_dbu)
        }
    };
    output_level_db + offset
}

/// Everything the gain stage depends on. Recomputing only happens when this
/// changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainInputs {
    pub input_level_db: f32,
    pub output_level_db: f32,
    pub output_mode: OutputMode,
    pub calibrate_input: bool,
    pub calibration_level_dbu: f32,
    pub model_input_level_dbu: Option<f32>,
    pub model_output_level_dbu: Option<f32>,
    pub model_loudness_db: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GainStage {
    inputs: Option<GainInputs>,
    input_db: f32,
    output_db: f32,
    input_gain: f32,
    output_gain: f32,
}

impl Default for GainStage {
    fn default() -> Self {
        Self::new()
    }
}

impl GainStage {
    pub fn new() -> Self {
        Self {
            inputs: None,
            input_db: 0.0,
            output_db: 0.0,
            input_gain: 1.0,
            output_gain: 1.0,
        }
    }

    /// Recompute if anything changed. Returns true when it did.
    pub fn update(&mut self, inputs: GainInputs) -> bool {
        if self.inputs == Some(inputs) {
            return false;
        }
        self.input_db = input_gain_db(
            inputs.input_level_db,
            inputs.calibrate_input,
            inputs.calibration_level_dbu,
            inputs.model_input_level_dbu,
        );
        self.output_db = output_gain_db(
            inputs.output_level_db,
            inputs.output_mode,
            inputs.model_loudness_db,
            inputs.model_output_level_dbu,
            inputs.calibration_level_dbu,
        );
        self.input_gain = db_to_gain(self.input_db);
        self.output_gain = db_to_gain(self.output_db);
        self.inputs = Some(inputs);
        true
    }

    /// Forget the cached inputs so the next update recomputes.
    pub fn invalidate(&mut self) {
        self.inputs = None;
    }

    #[inline]
    pub fn input_gain(&self) -> f32 {
        self.input_gain
    }

    #[inline]
    pub fn output_gain(&self) -> f32 {
        self.output_gain
    }

    pub fn input_db(&self) -> f32 {
        self.input_db
    }

    pub fn output_db(&self) -> f32 {
        self.output_db
    }
}
