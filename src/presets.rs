use crate::dsp::ToneBands;
use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

// =============================================================================
// PROCESSING MODES
// =============================================================================

/// Instrument profile. Selects the tone stack band centres and the usable
/// ranges of the level controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum ProcessingMode {
    #[serde(rename = "Guitar")]
    #[name = "Guitar"]
    Guitar,
    #[serde(rename = "Vocal")]
    #[name = "Vocal"]
    Vocal,
}

impl ProcessingMode {
    pub fn profile(&self) -> &'static ModeProfile {
        match self {
            ProcessingMode::Guitar => &ModeProfile::GUITAR,
            ProcessingMode::Vocal => &ModeProfile::VOCAL,
        }
    }
}

impl Default for ProcessingMode {
    fn default() -> Self {
        ProcessingMode::Guitar
    }
}

/// Inclusive dB range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRange {
    pub min: f32,
    pub max: f32,
}

impl LevelRange {
    #[inline]
    pub fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeProfile {
    pub bands: ToneBands,
    pub input_level: LevelRange,
    pub output_level: LevelRange,
    pub gate_threshold: LevelRange,
}

impl ModeProfile {
    pub const GUITAR: ModeProfile = ModeProfile {
        bands: ToneBands {
            bass_hz: 82.0,
            middle_hz: 500.0,
            treble_hz: 2000.0,
        },
        input_level: LevelRange {
            min: -20.0,
            max: 20.0,
        },
        output_level: LevelRange {
            min: -40.0,
            max: 40.0,
        },
        gate_threshold: LevelRange {
            min: -100.0,
            max: 0.0,
        },
    };

    pub const VOCAL: ModeProfile = ModeProfile {
        bands: ToneBands {
            bass_hz: 100.0,
            middle_hz: 1000.0,
            treble_hz: 5000.0,
        },
        input_level: LevelRange {
            min: -30.0,
            max: 30.0,
        },
        output_level: LevelRange {
            min: -40.0,
            max: 40.0,
        },
        gate_threshold: LevelRange {
            min: -100.0,
            max: -40.0,
        },
    };
}

// =============================================================================
// OUTPUT MODE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum OutputMode {
    #[serde(rename = "Raw")]
    #[name = "Raw"]
    Raw,
    #[serde(rename = "Normalized")]
    #[name = "Normalized"]
    Normalized,
    #[serde(rename = "Calibrated")]
    #[name = "Calibrated"]
    Calibrated,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Normalized
    }
}

// =============================================================================
// A/B SLOTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum AbSlot {
    #[serde(rename = "A")]
    #[name = "A"]
    A,
    #[serde(rename = "B")]
    #[name = "B"]
    B,
}

impl AbSlot {
    pub const ALL: [AbSlot; 2] = [AbSlot::A, AbSlot::B];

    #[inline]
    pub fn index(&self) -> usize {
        match self {
            AbSlot::A => 0,
            AbSlot::B => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AbSlot::A => "A",
            AbSlot::B => "B",
        }
    }
}

impl Default for AbSlot {
    fn default() -> Self {
        AbSlot::A
    }
}

/// Where the rig runs. Only the standalone host gets a hard output clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostKind {
    Hosted,
    Standalone,
}

impl Default for HostKind {
    fn default() -> Self {
        HostKind::Hosted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_match_modes() {
        assert_eq!(ProcessingMode::Guitar.profile().bands.bass_hz, 82.0);
        assert_eq!(ProcessingMode::Vocal.profile().bands.treble_hz, 5000.0);
        assert_eq!(ProcessingMode::Vocal.profile().gate_threshold.max, -40.0);
    }

    #[test]
    fn test_level_range_clamp() {
        let range = ModeProfile::GUITAR.input_level;
        assert_eq!(range.clamp(25.0), 20.0);
        assert_eq!(range.clamp(-25.0), -20.0);
        assert_eq!(range.clamp(3.5), 3.5);
    }

    #[test]
    fn test_slot_helpers() {
        assert_eq!(AbSlot::A.index(), 0);
        assert_eq!(AbSlot::B.name(), "B");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&OutputMode::Calibrated).unwrap();
        assert_eq!(json, "\"Calibrated\"");
        let mode: ProcessingMode = serde_json::from_str("\"Vocal\"").unwrap();
        assert_eq!(mode, ProcessingMode::Vocal);
    }
}
