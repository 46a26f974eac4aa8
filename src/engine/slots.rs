//! The two A/B slots and the objects that are active in them.

use super::{CabinetIr, ModelRunner, StreamConfig};
use crate::presets::AbSlot;
use log::warn;

#[derive(Default)]
pub struct Slot {
    pub model: Option<Box<ModelRunner>>,
    pub ir: Option<Box<CabinetIr>>,
}

#[derive(Default)]
pub struct SlotBank {
    slots: [Slot; 2],
}

impl SlotBank {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn slot(&self, slot: AbSlot) -> &Slot {
        &self.slots[slot.index()]
    }

    #[inline]
    pub fn slot_mut(&mut self, slot: AbSlot) -> &mut Slot {
        &mut self.slots[slot.index()]
    }

    #[inline]
    pub fn has_model(&self, slot: AbSlot) -> bool {
        self.slot(slot).model.is_some()
    }

    /// Install `model` as active, handing back whatever it replaced.
    pub fn replace_model(
        &mut self,
        slot: AbSlot,
        model: Option<Box<ModelRunner>>,
    ) -> Option<Box<ModelRunner>> {
        std::mem::replace(&mut self.slot_mut(slot).model, model)
    }

    pub fn replace_ir(
        &mut self,
        slot: AbSlot,
        ir: Option<Box<CabinetIr>>,
    ) -> Option<Box<CabinetIr>> {
        std::mem::replace(&mut self.slot_mut(slot).ir, ir)
    }

    /// Both slots' models, when both are loaded.
    pub fn both_models(&mut self) -> Option<(&mut ModelRunner, &mut ModelRunner)> {
        let [a, b] = &mut self.slots;
        match (a.model.as_deref_mut(), b.model.as_deref_mut()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Re-prepare everything for a new stream. An IR that cannot be rebuilt is
    /// dropped. Not realtime safe.
    pub fn prepare(&mut self, config: StreamConfig) {
        for slot in AbSlot::ALL {
            let entry = self.slot_mut(slot);
            if let Some(model) = entry.model.as_mut() {
                model.prepare(config);
            }
            if let Some(ir) = entry.ir.as_mut() {
                if let Err(e) = ir.prepare(config) {
                    warn!("dropping IR in slot {}: {e}", slot.name());
                    entry.ir = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AmpModel, ImpulseResponse, LinearModel};

    fn runner(gain: f32) -> Box<ModelRunner> {
        let models: Vec<Box<dyn AmpModel>> = vec![
            Box::new(LinearModel::new(vec![gain], 0.0)),
            Box::new(LinearModel::new(vec![gain], 0.0)),
        ];
        Box::new(ModelRunner::new(models, StreamConfig::default()))
    }

    #[test]
    fn test_replace_returns_previous() {
        let mut bank = SlotBank::new();
        assert!(bank.replace_model(AbSlot::A, Some(runner(1.0))).is_none());
        assert!(bank.has_model(AbSlot::A));
        assert!(!bank.has_model(AbSlot::B));
        assert!(bank.replace_model(AbSlot::A, None).is_some());
        assert!(!bank.has_model(AbSlot::A));
    }

    #[test]
    fn test_both_models_needs_both() {
        let mut bank = SlotBank::new();
        bank.replace_model(AbSlot::A, Some(runner(1.0)));
        assert!(bank.both_models().is_none());
        bank.replace_model(AbSlot::B, Some(runner(0.5)));
        let (a, b) = bank.both_models().unwrap();
        let mut out = [0.0; 1];
        a.process(0, &[1.0], &mut out);
        assert_eq!(out[0], 1.0);
        b.process(0, &[1.0], &mut out);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn test_prepare_keeps_short_ir_across_rate_change() {
        let mut bank = SlotBank::new();
        let ir = ImpulseResponse::new(vec![vec![1.0]], 96000.0).unwrap();
        let cab = CabinetIr::new(ir, StreamConfig::default()).unwrap();
        bank.replace_ir(AbSlot::A, Some(Box::new(cab)));
        bank.prepare(StreamConfig {
            sample_rate: 44100.0,
            max_block_size: 256,
        });
        let ir = bank.slot(AbSlot::A).ir.as_ref().unwrap();
        assert_eq!(ir.config().sample_rate, 44100.0);
    }

    #[test]
    fn test_prepare_updates_config() {
        let mut bank = SlotBank::new();
        bank.replace_model(AbSlot::B, Some(runner(1.0)));
        let config = StreamConfig {
            sample_rate: 44100.0,
            max_block_size: 128,
        };
        bank.prepare(config);
        assert_eq!(bank.slot(AbSlot::B).model.as_ref().unwrap().config(), config);
    }
}
