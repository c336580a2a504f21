//! Learners: update rules that consume episode batches.

pub mod optimizer;
pub mod payoff;
pub mod q_learner;


pub use optimizer::{RmsProp, OPTIMIZER_FILE};
pub use payoff::PayoffMatrix;
pub use q_learner::{categorical_entropy, valid_mask, QLearner};

use std::path::Path;

use crate::batch::EpisodeBatch;
use crate::error::Result;

/// A training update rule driven by the outer training loop.
pub trait Learner {
    /// Runs one update on `batch` at environment step `t_env` after
    /// `episode_num` episodes.
    fn train(&mut self, batch: &EpisodeBatch, t_env: u64, episode_num: u64) -> Result<()>;

    /// Moves every network to the configured accelerator.
    fn cuda(&mut self);

    /// Persists learner state into directory `dir`.
    fn save_models(&self, dir: &Path) -> Result<()>;

    /// Restores learner state from directory `dir`.
    fn load_models(&mut self, dir: &Path) -> Result<()>;
}
