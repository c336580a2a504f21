//! Mixing networks combining per-agent values into a joint value.

pub mod qmix;
pub mod vdn;

pub use qmix::QMixer;
pub use vdn::VdnMixer;

use std::path::Path;

use tch::{nn, Device, Tensor};

use crate::config::{LearnerConfig, MixerKind};
use crate::error::Result;

/// File name of the mixer artifact inside a save directory.
pub const MIXER_FILE: &str = "mixer.ot";

/// A differentiable map from per-agent values and global state to one joint
/// value per (episode, timestep).
pub trait Mixer {
    /// `agent_qs` is `[B, T, N]`, `states` is `[B, T, S]`; returns `[B, T, 1]`.
    fn forward(&self, agent_qs: &Tensor, states: &Tensor) -> Tensor;

    /// Global state width this mixer expects, if it reads the state at all.
    fn state_dim(&self) -> Option<i64> {
        None
    }

    /// Parameter store. Parameter-free mixers keep an empty store.
    fn var_store(&self) -> &nn::VarStore;

    /// Mutable parameter store.
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Trainable parameters.
    fn parameters(&self) -> Vec<Tensor> {
        self.var_store().trainable_variables()
    }

    /// Overwrites every parameter with the value held by `other`.
    fn load_state(&mut self, other: &dyn Mixer) -> Result<()> {
        self.var_store_mut().copy(other.var_store())?;
        Ok(())
    }

    /// Writes parameters to `path`.
    fn save(&self, path: &Path) -> Result<()> {
        self.var_store().save(path)?;
        Ok(())
    }

    /// Reads parameters from `path` onto this mixer's device.
    fn load(&mut self, path: &Path) -> Result<()> {
        self.var_store_mut().load(path)?;
        Ok(())
    }

    /// Moves parameters to `device`.
    fn to_device(&mut self, device: Device) {
        self.var_store_mut().set_device(device);
    }
}

/// Builds a freshly initialized mixer of the given kind.
pub fn build_mixer(kind: MixerKind, config: &LearnerConfig, device: Device) -> Result<Box<dyn Mixer>> {
    match kind {
        MixerKind::Vdn => Ok(Box::new(VdnMixer::new(device))),
        MixerKind::Qmix => Ok(Box::new(QMixer::new(config, device)?)),
    }
}
