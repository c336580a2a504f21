//! Multi-agent controller capability.

use std::path::Path;

use tch::{nn, Device, Tensor};

use crate::batch::EpisodeBatch;
use crate::error::Result;

/// File name of the controller artifact inside a save directory.
pub const AGENT_FILE: &str = "agent.ot";

/// A recurrent multi-agent controller producing per-agent action values.
///
/// Hidden state is reset by [`Controller::init_hidden`] and then carried
/// across successive [`Controller::forward`] calls on the same batch.
/// Parameters live in a single [`nn::VarStore`], which is what target syncs,
/// optimizers and persistence operate on.
pub trait Controller {
    /// Architecture description needed to build an identical instance.
    type Config: Clone;

    /// Builds a freshly initialized controller on `device`.
    fn new(config: &Self::Config, device: Device) -> Result<Self>
    where
        Self: Sized;

    /// Configuration this controller was built from.
    fn config(&self) -> &Self::Config;

    /// Number of discrete actions per agent.
    fn n_actions(&self) -> i64;

    /// Per-agent observation width expected in `batch.obs`.
    fn obs_shape(&self) -> i64;

    /// Resets recurrent state for a batch of `batch_size` episodes.
    fn init_hidden(&mut self, batch_size: i64);

    /// Action values for timestep `t`, shaped `[B, N, A]`.
    fn forward(&mut self, batch: &EpisodeBatch, t: i64) -> Tensor;

    /// Parameter store.
    fn var_store(&self) -> &nn::VarStore;

    /// Mutable parameter store.
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Trainable parameters.
    fn parameters(&self) -> Vec<Tensor> {
        self.var_store().trainable_variables()
    }

    /// Overwrites every parameter with the value held by `other`.
    fn load_state(&mut self, other: &Self) -> Result<()>
    where
        Self: Sized,
    {
        self.var_store_mut().copy(other.var_store())?;
        Ok(())
    }

    /// Writes parameters to `dir/agent.ot`.
    fn save_models(&self, dir: &Path) -> Result<()> {
        self.var_store().save(dir.join(AGENT_FILE))?;
        Ok(())
    }

    /// Reads parameters from `dir/agent.ot` onto this controller's device.
    fn load_models(&mut self, dir: &Path) -> Result<()> {
        self.var_store_mut().load(dir.join(AGENT_FILE))?;
        Ok(())
    }

    /// Moves parameters to `device`.
    fn to_device(&mut self, device: Device) {
        self.var_store_mut().set_device(device);
    }
}

/// Per-timestep outputs of a controller over one batch.
///
/// Creating a rollout resets the controller's hidden state; each item is the
/// `[B, N, A]` output for the next timestep, up to the batch's padded length.
pub struct Rollout<'a, C: Controller + ?Sized> {
    controller: &'a mut C,
    batch: &'a EpisodeBatch,
    t: i64,
}

impl<'a, C: Controller + ?Sized> Rollout<'a, C> {
    /// Starts a rollout of `controller` over `batch`.
    pub fn new(controller: &'a mut C, batch: &'a EpisodeBatch) -> Self {
        controller.init_hidden(batch.batch_size());
        Self {
            controller,
            batch,
            t: 0,
        }
    }

    /// Consumes the rollout into one `[B, T, N, A]` tensor.
    pub fn stack(self) -> Tensor {
        let outs: Vec<Tensor> = self.collect();
        Tensor::stack(&outs, 1)
    }
}

impl<C: Controller + ?Sized> Iterator for Rollout<'_, C> {
    type Item = Tensor;

    fn next(&mut self) -> Option<Tensor> {
        if self.t >= self.batch.max_seq_length() {
            return None;
        }
        let out = self.controller.forward(self.batch, self.t);
        self.t += 1;
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.batch.max_seq_length() - self.t).max(0) as usize;
        (left, Some(left))
    }
}

impl<C: Controller + ?Sized> ExactSizeIterator for Rollout<'_, C> {}
