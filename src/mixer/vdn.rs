//! Additive value decomposition.

use tch::{nn, Device, Kind, Tensor};

use super::Mixer;

/// Sums per-agent values: `Q_tot = Σ_a Q_a`.
pub struct VdnMixer {
    vs: nn::VarStore,
}

impl VdnMixer {
    /// Creates the mixer. It has no parameters.
    pub fn new(device: Device) -> Self {
        Self {
            vs: nn::VarStore::new(device),
        }
    }
}

impl Mixer for VdnMixer {
    fn forward(&self, agent_qs: &Tensor, _states: &Tensor) -> Tensor {
        agent_qs.sum_dim_intlist([2].as_slice(), true, Kind::Float)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}
