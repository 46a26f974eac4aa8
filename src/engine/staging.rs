//! Control-thread side of model and IR hand-off.
//!
//! The [`Controller`] does all file I/O and construction, then publishes the
//! finished object over a bounded SPSC ring. The audio thread takes it at the
//! top of its next block and sends whatever it replaced back over a second
//! ring, so nothing is ever freed on the audio thread. Objects staged for a
//! stream configuration the pipeline has since left come back as stale and
//! are reloaded from their recorded path on the next [`Controller::poll`].

use super::{CabinetIr, IrLoader, ModelFactory, ModelRunner, StreamConfig, NUM_CHANNELS};
use crate::error::{IrLoadError, LoadError};
use crate::presets::AbSlot;
use log::{info, warn};
use ringbuf::{Consumer, Producer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const COMMAND_CAPACITY: usize = 16;
pub(crate) const RETIRE_CAPACITY: usize = 32;

/// Control -> audio.
pub enum Command {
    StageModel(AbSlot, Box<ModelRunner>),
    StageIr(AbSlot, Box<CabinetIr>),
    RemoveModel(AbSlot),
    RemoveIr(AbSlot),
}

/// Audio -> control. Dropped on arrival unless stale.
pub enum Retired {
    Model(Box<ModelRunner>),
    Ir(Box<CabinetIr>),
    StaleModel(AbSlot, Box<ModelRunner>),
    StaleIr(AbSlot, Box<CabinetIr>),
}

/// The stream configuration the pipeline was last reset for.
#[derive(Debug)]
pub struct SharedConfig {
    sample_rate: AtomicU32,
    max_block_size: AtomicUsize,
}

impl SharedConfig {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            sample_rate: AtomicU32::new(config.sample_rate.to_bits()),
            max_block_size: AtomicUsize::new(config.max_block_size),
        }
    }

    pub fn store(&self, config: StreamConfig) {
        self.sample_rate
            .store(config.sample_rate.to_bits(), Ordering::Release);
        self.max_block_size
            .store(config.max_block_size, Ordering::Release);
    }

    pub fn load(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: f32::from_bits(self.sample_rate.load(Ordering::Acquire)),
            max_block_size: self.max_block_size.load(Ordering::Acquire),
        }
    }
}

pub struct Controller {
    commands: Producer<Command>,
    retired: Consumer<Retired>,
    factory: ModelFactory,
    ir_loader: Box<dyn IrLoader>,
    shared: Arc<SharedConfig>,
    model_paths: [Option<PathBuf>; 2],
    ir_paths: [Option<PathBuf>; 2],
}

impl Controller {
    pub(crate) fn new(
        commands: Producer<Command>,
        retired: Consumer<Retired>,
        factory: ModelFactory,
        ir_loader: Box<dyn IrLoader>,
        shared: Arc<SharedConfig>,
    ) -> Self {
        Self {
            commands,
            retired,
            factory,
            ir_loader,
            shared,
            model_paths: [None, None],
            ir_paths: [None, None],
        }
    }

    pub fn model_path(&self, slot: AbSlot) -> Option<&Path> {
        self.model_paths[slot.index()].as_deref()
    }

    pub fn ir_path(&self, slot: AbSlot) -> Option<&Path> {
        self.ir_paths[slot.index()].as_deref()
    }

    /// Load a model file and stage it for `slot`. On failure the slot keeps
    /// whatever it was playing and its recorded path.
    pub fn load_model(&mut self, slot: AbSlot, path: &Path) -> Result<(), LoadError> {
        let config = self.shared.load();
        let models = match self.factory.load(path, NUM_CHANNELS) {
            Ok(models) => models,
            Err(e) => {
                warn!("model load failed for slot {}: {e}", slot.name());
                return Err(e);
            }
        };
        let runner = Box::new(ModelRunner::new(models, config));
        if self
            .commands
            .push(Command::StageModel(slot, runner))
            .is_err()
        {
            warn!("model for slot {} not staged: queue full", slot.name());
            return Err(LoadError::QueueFull);
        }
        self.model_paths[slot.index()] = Some(path.to_path_buf());
        info!("staged model for slot {}: {}", slot.name(), path.display());
        Ok(())
    }

    /// Load an impulse response and stage it for `slot`.
    pub fn load_ir(&mut self, slot: AbSlot, path: &Path) -> Result<(), IrLoadError> {
        let config = self.shared.load();
        let ir = self
            .ir_loader
            .load(path, config.sample_rate)
            .and_then(|ir| CabinetIr::new(ir, config));
        let ir = match ir {
            Ok(ir) => Box::new(ir),
            Err(e) => {
                warn!("IR load failed for slot {}: {e}", slot.name());
                return Err(e);
            }
        };
        if self.commands.push(Command::StageIr(slot, ir)).is_err() {
            warn!("IR for slot {} not staged: queue full", slot.name());
            return Err(IrLoadError::Other("staging queue is full".into()));
        }
        self.ir_paths[slot.index()] = Some(path.to_path_buf());
        info!("staged IR for slot {}: {}", slot.name(), path.display());
        Ok(())
    }

    /// Clear `slot`'s model at the next block boundary. Returns false if the
    /// queue was full.
    pub fn remove_model(&mut self, slot: AbSlot) -> bool {
        if self.commands.push(Command::RemoveModel(slot)).is_err() {
            return false;
        }
        self.model_paths[slot.index()] = None;
        true
    }

    pub fn remove_ir(&mut self, slot: AbSlot) -> bool {
        if self.commands.push(Command::RemoveIr(slot)).is_err() {
            return false;
        }
        self.ir_paths[slot.index()] = None;
        true
    }

    /// Drop everything the audio thread handed back and reload stale
    /// objects. Returns how many objects were collected.
    pub fn poll(&mut self) -> usize {
        let mut stale_models = [false; 2];
        let mut stale_irs = [false; 2];
        let mut collected = 0;
        while let Some(retired) = self.retired.pop() {
            collected += 1;
            match retired {
                Retired::Model(_) | Retired::Ir(_) => {}
                Retired::StaleModel(slot, _) => stale_models[slot.index()] = true,
                Retired::StaleIr(slot, _) => stale_irs[slot.index()] = true,
            }
        }

        for slot in AbSlot::ALL {
            if stale_models[slot.index()] {
                if let Some(path) = self.model_paths[slot.index()].clone() {
                    info!("reloading stale model for slot {}", slot.name());
                    let _ = self.load_model(slot, &path);
                }
            }
            if stale_irs[slot.index()] {
                if let Some(path) = self.ir_paths[slot.index()].clone() {
                    info!("reloading stale IR for slot {}", slot.name());
                    let _ = self.load_ir(slot, &path);
                }
            }
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::tests::linear_json;
    use crate::engine::WavIrLoader;
    use ringbuf::RingBuffer;

    fn controller() -> (Controller, Consumer<Command>, Producer<Retired>) {
        let (cmd_tx, cmd_rx) = RingBuffer::<Command>::new(2).split();
        let (ret_tx, ret_rx) = RingBuffer::<Retired>::new(4).split();
        let shared = Arc::new(SharedConfig::new(StreamConfig::default()));
        let ctl = Controller::new(
            cmd_tx,
            ret_rx,
            ModelFactory::new(),
            Box::new(WavIrLoader),
            shared,
        );
        (ctl, cmd_rx, ret_tx)
    }

    #[test]
    fn test_shared_config_round_trip() {
        let shared = SharedConfig::new(StreamConfig::default());
        let config = StreamConfig {
            sample_rate: 96000.0,
            max_block_size: 64,
        };
        shared.store(config);
        assert_eq!(shared.load(), config);
    }

    #[test]
    fn test_failed_load_keeps_previous_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.nam");
        std::fs::write(&good, linear_json(&[1.0], 48000.0, "{}")).unwrap();

        let (mut ctl, mut rx, _tx) = controller();
        ctl.load_model(AbSlot::A, &good).unwrap();
        assert!(matches!(rx.pop(), Some(Command::StageModel(AbSlot::A, _))));

        let bad = dir.path().join("missing.nam");
        assert!(matches!(
            ctl.load_model(AbSlot::A, &bad),
            Err(LoadError::NotFound(_))
        ));
        assert_eq!(ctl.model_path(AbSlot::A), Some(good.as_path()));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_full_queue_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.nam");
        std::fs::write(&path, linear_json(&[1.0], 48000.0, "{}")).unwrap();

        let (mut ctl, _rx, _tx) = controller();
        ctl.load_model(AbSlot::A, &path).unwrap();
        ctl.load_model(AbSlot::B, &path).unwrap();
        assert!(matches!(
            ctl.load_model(AbSlot::A, &path),
            Err(LoadError::QueueFull)
        ));
    }

    #[test]
    fn test_remove_clears_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.nam");
        std::fs::write(&path, linear_json(&[1.0], 48000.0, "{}")).unwrap();

        let (mut ctl, mut rx, _tx) = controller();
        ctl.load_model(AbSlot::B, &path).unwrap();
        let _ = rx.pop();
        assert!(ctl.remove_model(AbSlot::B));
        assert!(ctl.model_path(AbSlot::B).is_none());
        assert!(matches!(rx.pop(), Some(Command::RemoveModel(AbSlot::B))));
    }

    #[test]
    fn test_poll_reloads_stale_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.nam");
        std::fs::write(&path, linear_json(&[1.0], 48000.0, "{}")).unwrap();

        let (mut ctl, mut rx, mut tx) = controller();
        ctl.load_model(AbSlot::A, &path).unwrap();
        let Some(Command::StageModel(_, runner)) = rx.pop() else {
            panic!("expected a staged model");
        };
        assert!(tx.push(Retired::StaleModel(AbSlot::A, runner)).is_ok());
        assert_eq!(ctl.poll(), 1);
        assert!(matches!(rx.pop(), Some(Command::StageModel(AbSlot::A, _))));
    }
}
