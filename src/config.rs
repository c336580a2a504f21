//! Configuration for the TD learner and its mixing network.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tch::Device;

use crate::error::{LearnerError, Result};

/// How per-agent values are combined into a joint value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerKind {
    /// Additive decomposition: `Q_tot = Σ Q_a`.
    Vdn,
    /// Monotonic hypernetwork mixing conditioned on the global state.
    Qmix,
}

impl FromStr for MixerKind {
    type Err = LearnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vdn" => Ok(MixerKind::Vdn),
            "qmix" => Ok(MixerKind::Qmix),
            other => Err(LearnerError::UnknownMixer(other.to_string())),
        }
    }
}

impl fmt::Display for MixerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerKind::Vdn => write!(f, "vdn"),
            MixerKind::Qmix => write!(f, "qmix"),
        }
    }
}

/// Hyperparameters for [`QLearner`](crate::learners::QLearner).
///
/// Intervals are measured in the units the training loop passes to
/// `train`: target syncs in episodes, stat emission in environment steps.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LearnerConfig {
    // --- TD target ---
    /// Discount factor γ.
    pub gamma: f64,
    /// Use the live network to pick bootstrap actions.
    pub double_q: bool,

    // --- Optimizer (RMSprop) ---
    /// Learning rate.
    pub lr: f64,
    /// Smoothing constant of the squared-gradient average.
    pub optim_alpha: f64,
    /// Term added to the denominator for numerical stability.
    pub optim_eps: f64,
    /// Bound on the global gradient norm.
    pub grad_norm_clip: f64,

    // --- Cadence ---
    /// Episodes between hard target syncs.
    pub target_update_interval: u64,
    /// Environment steps between stat emissions.
    pub learner_log_interval: u64,

    // --- Mixing ---
    /// Mixer selector: `None`, `"vdn"` or `"qmix"`.
    pub mixer: Option<String>,
    /// Number of agents in the team.
    pub n_agents: usize,
    /// Size of the global state vector fed to the mixer.
    pub state_shape: usize,
    /// Width of the QMIX mixing layer.
    pub mixing_embed_dim: usize,
    /// Depth of the QMIX weight hypernetworks (1 or 2).
    pub hypernet_layers: usize,
    /// Hidden width of 2-layer hypernetworks.
    pub hypernet_embed: usize,

    // --- Device ---
    /// Run on CUDA when available.
    pub use_cuda: bool,
}

impl LearnerConfig {
    /// Parses the mixer selector. `Ok(None)` means independent learners.
    pub fn mixer_kind(&self) -> Result<Option<MixerKind>> {
        self.mixer.as_deref().map(MixerKind::from_str).transpose()
    }

    /// Resolves the compute device.
    pub fn device(&self) -> Device {
        if self.use_cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        }
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            double_q: true,
            lr: 5e-4,
            optim_alpha: 0.99,
            optim_eps: 1e-5,
            grad_norm_clip: 10.0,
            target_update_interval: 200,
            learner_log_interval: 10_000,
            mixer: Some("qmix".to_string()),
            n_agents: 2,
            state_shape: 1,
            mixing_embed_dim: 32,
            hypernet_layers: 1,
            hypernet_embed: 64,
            use_cuda: false,
        }
    }
}
