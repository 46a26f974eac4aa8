//! Lock-free telemetry shared between the audio thread and the editor or
//! render tool. Floats are stored as their bit patterns in `AtomicU32`.

use crate::dsp::utils::DB_FLOOR;
use crate::presets::AbSlot;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct Meters {
    input_peak_db: AtomicU32,
    output_peak_db: AtomicU32,
    loudness_lufs: AtomicU32,
    latency_samples: AtomicU32,
    active_slot: AtomicU32,
    stale_loads: AtomicU32,
    audio_thread_drops: AtomicU32,
}

impl Default for Meters {
    fn default() -> Self {
        Self::new()
    }
}

impl Meters {
    pub fn new() -> Self {
        let meters = Self {
            input_peak_db: AtomicU32::new(0),
            output_peak_db: AtomicU32::new(0),
            loudness_lufs: AtomicU32::new(0),
            latency_samples: AtomicU32::new(0),
            active_slot: AtomicU32::new(0),
            stale_loads: AtomicU32::new(0),
            audio_thread_drops: AtomicU32::new(0),
        };
        meters.reset();
        meters
    }

    pub fn reset(&self) {
        self.set_input_peak_db(DB_FLOOR);
        self.set_output_peak_db(DB_FLOOR);
        self.set_loudness_lufs(DB_FLOOR);
        self.latency_samples.store(0, Ordering::Relaxed);
        self.active_slot.store(0, Ordering::Relaxed);
    }

    pub fn set_input_peak_db(&self, val: f32) {
        self.input_peak_db.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_peak_db(&self, val: f32) {
        self.output_peak_db.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_loudness_lufs(&self, val: f32) {
        self.loudness_lufs.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_latency_samples(&self, val: u32) {
        self.latency_samples.store(val, Ordering::Relaxed);
    }

    pub fn set_active_slot(&self, slot: AbSlot) {
        self.active_slot.store(slot.index() as u32, Ordering::Relaxed);
    }

    pub fn count_stale_load(&self) {
        self.stale_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_audio_thread_drop(&self) {
        self.audio_thread_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_input_peak_db(&self) -> f32 {
        f32::from_bits(self.input_peak_db.load(Ordering::Relaxed))
    }

    pub fn get_output_peak_db(&self) -> f32 {
        f32::from_bits(self.output_peak_db.load(Ordering::Relaxed))
    }

    pub fn get_loudness_lufs(&self) -> f32 {
        f32::from_bits(self.loudness_lufs.load(Ordering::Relaxed))
    }

    pub fn get_latency_samples(&self) -> u32 {
        self.latency_samples.load(Ordering::Relaxed)
    }

    pub fn get_active_slot(&self) -> AbSlot {
        match self.active_slot.load(Ordering::Relaxed) {
            1 => AbSlot::B,
            _ => AbSlot::A,
        }
    }

    /// Staged objects rejected because the stream changed under them.
    pub fn get_stale_loads(&self) -> u32 {
        self.stale_loads.load(Ordering::Relaxed)
    }

    /// Replaced objects freed in `process` because the retire queue was full.
    pub fn get_audio_thread_drops(&self) -> u32 {
        self.audio_thread_drops.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_bits() {
        let meters = Meters::new();
        assert_eq!(meters.get_output_peak_db(), DB_FLOOR);
        meters.set_output_peak_db(-6.5);
        meters.set_active_slot(AbSlot::B);
        meters.count_stale_load();
        meters.count_audio_thread_drop();
        assert_eq!(meters.get_output_peak_db(), -6.5);
        assert_eq!(meters.get_active_slot(), AbSlot::B);
        assert_eq!(meters.get_stale_loads(), 1);

        meters.reset();
        assert_eq!(meters.get_active_slot(), AbSlot::A);
        assert_eq!(meters.get_stale_loads(), 1);
        assert_eq!(meters.get_audio_thread_drops(), 1);
    }
}
