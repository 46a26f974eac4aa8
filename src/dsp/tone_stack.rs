//! Three-band tone stack: bass low shelf, middle peak, treble high shelf.
//!
//! Knobs run 0..10 with 5 as flat. One `ToneStack` serves one channel; the
//! pipeline keeps one per channel and hands them identical settings.

use super::biquad::{Biquad, Coefficients};

const SHELF_Q: f32 = 0.707;
const MIDDLE_Q: f32 = 0.7;

const BASS_DB_PER_STEP: f32 = 4.0;
const MIDDLE_DB_PER_STEP: f32 = 3.0;
const TREBLE_DB_PER_STEP: f32 = 2.0;

pub const KNOB_CENTER: f32 = 5.0;

/// Centre frequencies of the three bands, in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneBands {
    pub bass_hz: f32,
    pub middle_hz: f32,
    pub treble_hz: f32,
}

/// Knob positions, 0..10.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneKnobs {
    pub bass: f32,
    pub middle: f32,
    pub treble: f32,
}

impl Default for ToneKnobs {
    fn default() -> Self {
        Self {
            bass: KNOB_CENTER,
            middle: KNOB_CENTER,
            treble: KNOB_CENTER,
        }
    }
}

impl ToneKnobs {
    pub fn bass_db(&self) -> f32 {
        BASS_DB_PER_STEP * (self.bass - KNOB_CENTER)
    }

    pub fn middle_db(&self) -> f32 {
        MIDDLE_DB_PER_STEP * (self.middle - KNOB_CENTER)
    }

    pub fn treble_db(&self) -> f32 {
        TREBLE_DB_PER_STEP * (self.treble - KNOB_CENTER)
    }
}

#[derive(Debug, Clone)]
pub struct ToneStack {
    bass: Biquad,
    middle: Biquad,
    treble: Biquad,
    bands: ToneBands,
    knobs: ToneKnobs,
    sample_rate: f32,
}

impl ToneStack {
    pub fn new(bands: ToneBands, sample_rate: f32) -> Self {
        let mut stack = Self {
            bass: Biquad::new(),
            middle: Biquad::new(),
            treble: Biquad::new(),
            bands,
            knobs: ToneKnobs::default(),
            sample_rate,
        };
        stack.design();
        stack
    }

    /// Apply new settings. Coefficients are only recomputed when something
    /// actually changed.
    pub fn configure(&mut self, bands: ToneBands, knobs: ToneKnobs, sample_rate: f32) {
        if bands == self.bands && knobs == self.knobs && sample_rate == self.sample_rate {
            return;
        }
        self.bands = bands;
        self.knobs = knobs;
        self.sample_rate = sample_rate;
        self.design();
    }

    fn design(&mut self) {
        let sr = self.sample_rate;
        self.bass.set_coefficients(Coefficients::low_shelf(
            self.bands.bass_hz,
            SHELF_Q,
            self.knobs.bass_db(),
            sr,
        ));
        self.middle.set_coefficients(Coefficients::peaking(
            self.bands.middle_hz,
            MIDDLE_Q,
            self.knobs.middle_db(),
            sr,
        ));
        self.treble.set_coefficients(Coefficients::high_shelf(
            self.bands.treble_hz,
            SHELF_Q,
            self.knobs.treble_db(),
            sr,
        ));
    }

    pub fn bands(&self) -> ToneBands {
        self.bands
    }

    pub fn process_block(&mut self, buf: &mut [f32]) {
        for s in buf.iter_mut() {
            *s = self.treble.process(self.middle.process(self.bass.process(*s)));
        }
    }

    pub fn reset(&mut self) {
        self.bass.reset();
        self.middle.reset();
        self.treble.reset();
    }

    /// Combined magnitude of the three bands at `freq`.
    pub fn magnitude_at(&self, freq: f32) -> f32 {
        let sr = self.sample_rate;
        self.bass.coefficients().magnitude_at(freq, sr)
            * self.middle.coefficients().magnitude_at(freq, sr)
            * self.treble.coefficients().magnitude_at(freq, sr)
    }
}
