//! Level-triggered noise gate.
//!
//! The gate does not touch audio itself. [`GateTrigger::process`] writes a
//! per-sample gain envelope in `[0, 1]` which the pipeline multiplies into the
//! signal, once before the amp model and again after it.
//!
//! # Behaviour
//! - Level detector: one-pole smoothed power, clamped so that silence reads
//!   as -60 dB and a runaway input cannot overflow.
//! - **Holding**: gain is unity. Once the level has stayed below threshold for
//!   the hold time the trigger starts **Moving**.
//! - **Moving**: target reduction is `-ratio * (level - threshold)^2` dB.
//!   The gain closes at most `MAX_REDUCTION_DB / close` dB per second and opens
//!   at most `MAX_REDUCTION_DB / open` dB per second, halving the distance to
//!   the target each sample within those limits. Back at 0 dB the trigger
//!   returns to Holding.
//!
//! Each channel owns its own trigger; the parameters are shared.

use super::utils::db_to_gain;

const MIN_LEVEL_POWER: f32 = 1e-6;
const MAX_LEVEL_POWER: f32 = 1000.0;

// Halving towards 0 dB never lands exactly on it
const OPEN_SNAP_DB: f32 = 1e-6;

/// Deepest attenuation the gate will apply, in dB.
pub const MAX_REDUCTION_DB: f32 = -120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    /// Level detector time constant, seconds.
    pub time: f32,
    pub threshold_db: f32,
    pub ratio: f32,
    pub open_time: f32,
    pub hold_time: f32,
    pub close_time: f32,
}

impl GateParams {
    pub fn with_threshold(threshold_db: f32) -> Self {
        Self {
            threshold_db,
            ..Self::default()
        }
    }
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            time: 0.01,
            threshold_db: -80.0,
            ratio: 0.1,
            open_time: 0.005,
            hold_time: 0.01,
            close_time: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Holding,
    Moving,
}

#[derive(Debug, Clone)]
pub struct GateTrigger {
    sample_rate: f32,
    level: f32,
    state: GateState,
    time_held: f32,
    reduction_db: f32,
}

impl GateTrigger {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            level: MIN_LEVEL_POWER,
            state: GateState::Holding,
            time_held: 0.0,
            reduction_db: 0.0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.level = MIN_LEVEL_POWER;
        self.state = GateState::Holding;
        self.time_held = 0.0;
        self.reduction_db = 0.0;
    }

    /// Fill `gain` with the envelope for `input`. Lengths must match.
    pub fn process(&mut self, input: &[f32], params: &GateParams, gain: &mut [f32]) {
        debug_assert_eq!(input.len(), gain.len());

        let dt = 1.0 / self.sample_rate;
        let alpha = 0.5f32.powf(1.0 / (params.time * self.sample_rate).max(1e-6));
        let beta = 1.0 - alpha;
        let max_open_step = -MAX_REDUCTION_DB / params.open_time.max(1e-6) * dt;
        let max_close_step = MAX_REDUCTION_DB / params.close_time.max(1e-6) * dt;

        for (x, g) in input.iter().zip(gain.iter_mut()) {
            self.level =
                (alpha * self.level + beta * x * x).clamp(MIN_LEVEL_POWER, MAX_LEVEL_POWER);
            let level_db = 10.0 * self.level.log10();

            match self.state {
                GateState::Holding => {
                    self.reduction_db = 0.0;
                    if level_db < params.threshold_db {
                        self.time_held += dt;
                        if self.time_held >= params.hold_time {
                            self.state = GateState::Moving;
                        }
                    } else {
                        self.time_held = 0.0;
                    }
                }
                GateState::Moving => {
                    let target = target_reduction_db(level_db, params);
                    if target > self.reduction_db {
                        let step = (0.5 * (target - self.reduction_db)).clamp(0.0, max_open_step);
                        self.reduction_db += step;
                        if self.reduction_db >= -OPEN_SNAP_DB {
                            self.reduction_db = 0.0;
                            self.state = GateState::Holding;
                            self.time_held = 0.0;
                        }
                    } else if target < self.reduction_db {
                        let step =
                            (0.5 * (target - self.reduction_db)).clamp(max_close_step, 0.0);
                        self.reduction_db = (self.reduction_db + step).max(MAX_REDUCTION_DB);
                    }
                }
            }

            *g = db_to_gain(self.reduction_db).clamp(0.0, 1.0);
        }
    }
}

#[inline]
fn target_reduction_db(level_db: f32, params: &GateParams) -> f32 {
    if level_db < params.threshold_db {
        let d = level_db - params.threshold_db;
        -params.ratio * d * d
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize, amp: f32, freq: f32, sr: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn test_threshold_below_signal_floor_gives_unity() {
        let mut trigger = GateTrigger::new(48000.0);
        let params = GateParams::with_threshold(-100.0);
        // Detector floor is -60 dB, so even silence sits above -100 dB
        let mut input = sine(4800, 0.001, 220.0, 48000.0);
        input.extend(std::iter::repeat(0.0).take(4800));
        let mut gain = vec![0.0; input.len()];
        trigger.process(&input, &params, &mut gain);
        assert!(gain.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_gate_closes_on_silence() {
        let mut trigger = GateTrigger::new(48000.0);
        // Floor at -60 dB is 40 dB under threshold: target well past -120 dB
        let params = GateParams::with_threshold(-20.0);
        let input = vec![0.0; 48000];
        let mut gain = vec![1.0; input.len()];
        trigger.process(&input, &params, &mut gain);

        assert_eq!(gain[0], 1.0);
        assert!(gain.iter().all(|&g| (0.0..=1.0).contains(&g)));
        assert!(gain[47999] < 1e-3, "gate still open: {}", gain[47999]);
    }

    #[test]
    fn test_gate_reopens_on_loud_signal() {
        let mut trigger = GateTrigger::new(48000.0);
        let params = GateParams::with_threshold(-20.0);
        let mut gain = vec![0.0; 24000];
        trigger.process(&vec![0.0; 24000], &params, &mut gain);
        assert!(gain[23999] < 1e-3);

        let loud = sine(24000, 0.5, 220.0, 48000.0);
        trigger.process(&loud, &params, &mut gain);
        assert_eq!(gain[23999], 1.0);
    }

    #[test]
    fn test_channels_are_independent() {
        let params = GateParams::with_threshold(-40.0);
        let mut left = GateTrigger::new(48000.0);
        let mut right = GateTrigger::new(48000.0);

        let loud = sine(9600, 0.5, 220.0, 48000.0);
        let quiet = vec![0.0; 9600];
        let mut gain_l = vec![0.0; 9600];
        let mut gain_r = vec![0.0; 9600];
        left.process(&loud, &params, &mut gain_l);
        right.process(&quiet, &params, &mut gain_r);

        assert_eq!(gain_l[9599], 1.0);
        assert!(gain_r[9599] < 0.5);
    }
}
