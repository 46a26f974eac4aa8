pub mod biquad;
pub mod convolver;
pub mod dc_blocker;
pub mod denormal;
pub mod noise_gate;
pub mod resampler;
pub mod tone_stack;
pub mod utils;

pub use biquad::{Biquad, Coefficients};
pub use convolver::Convolver;
pub use dc_blocker::DcBlocker;
pub use denormal::DenormalGuard;
pub use noise_gate::{GateParams, GateTrigger};
pub use resampler::{resample_offline, CubicResampler, OfflineResampleError};
pub use tone_stack::{ToneBands, ToneKnobs, ToneStack};
