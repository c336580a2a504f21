//! Monotonic mixing network (QMIX).
//!
//! Hypernetworks conditioned on the global state generate the weights of a
//! two-layer mixing network. Mixing weights pass through `abs`, so the joint
//! value is monotonically non-decreasing in every agent's value.

use tch::{nn, nn::Module, Device, Tensor};

use super::Mixer;
use crate::config::LearnerConfig;
use crate::error::{LearnerError, Result};

/// State-conditioned monotonic mixer.
pub struct QMixer {
    vs: nn::VarStore,
    n_agents: i64,
    state_dim: i64,
    embed_dim: i64,
    hyper_w_1: nn::Sequential,
    hyper_w_final: nn::Sequential,
    hyper_b_1: nn::Linear,
    v: nn::Sequential,
}

impl QMixer {
    /// Creates the mixer from `n_agents`, `state_shape`, `mixing_embed_dim`,
    /// `hypernet_layers` and `hypernet_embed`.
    pub fn new(config: &LearnerConfig, device: Device) -> Result<Self> {
        if config.n_agents == 0 || config.state_shape == 0 || config.mixing_embed_dim == 0 {
            return Err(LearnerError::InvalidConfig(
                "qmix needs positive n_agents, state_shape and mixing_embed_dim".to_string(),
            ));
        }
        let n_agents = config.n_agents as i64;
        let state_dim = config.state_shape as i64;
        let embed_dim = config.mixing_embed_dim as i64;
        let hypernet_embed = config.hypernet_embed as i64;

        let vs = nn::VarStore::new(device);
        let p = &vs.root();

        let (hyper_w_1, hyper_w_final) = match config.hypernet_layers {
            1 => (
                nn::seq().add(nn::linear(
                    p / "hyper_w_1",
                    state_dim,
                    embed_dim * n_agents,
                    Default::default(),
                )),
                nn::seq().add(nn::linear(
                    p / "hyper_w_final",
                    state_dim,
                    embed_dim,
                    Default::default(),
                )),
            ),
            2 => (
                nn::seq()
                    .add(nn::linear(
                        p / "hyper_w_1_0",
                        state_dim,
                        hypernet_embed,
                        Default::default(),
                    ))
                    .add_fn(|x| x.relu())
                    .add(nn::linear(
                        p / "hyper_w_1_2",
                        hypernet_embed,
                        embed_dim * n_agents,
                        Default::default(),
                    )),
                nn::seq()
                    .add(nn::linear(
                        p / "hyper_w_final_0",
                        state_dim,
                        hypernet_embed,
                        Default::default(),
                    ))
                    .add_fn(|x| x.relu())
                    .add(nn::linear(
                        p / "hyper_w_final_2",
                        hypernet_embed,
                        embed_dim,
                        Default::default(),
                    )),
            ),
            other => {
                return Err(LearnerError::InvalidConfig(format!(
                    "hypernet_layers must be 1 or 2, got {other}"
                )))
            }
        };

        let hyper_b_1 = nn::linear(p / "hyper_b_1", state_dim, embed_dim, Default::default());

        // V(s) replaces the final bias
        let v = nn::seq()
            .add(nn::linear(p / "V_0", state_dim, embed_dim, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "V_2", embed_dim, 1, Default::default()));

        Ok(Self {
            vs,
            n_agents,
            state_dim,
            embed_dim,
            hyper_w_1,
            hyper_w_final,
            hyper_b_1,
            v,
        })
    }
}

impl Mixer for QMixer {
    fn forward(&self, agent_qs: &Tensor, states: &Tensor) -> Tensor {
        let bs = agent_qs.size()[0];
        let states = states.reshape([-1, self.state_dim]);
        let agent_qs = agent_qs.reshape([-1, 1, self.n_agents]);

        let w1 = self
            .hyper_w_1
            .forward(&states)
            .abs()
            .view([-1, self.n_agents, self.embed_dim]);
        let b1 = self
            .hyper_b_1
            .forward(&states)
            .view([-1, 1, self.embed_dim]);
        let hidden = (agent_qs.bmm(&w1) + b1).elu();

        let w_final = self
            .hyper_w_final
            .forward(&states)
            .abs()
            .view([-1, self.embed_dim, 1]);
        let v = self.v.forward(&states).view([-1, 1, 1]);

        let y = hidden.bmm(&w_final) + v;
        y.view([bs, -1, 1])
    }

    fn state_dim(&self) -> Option<i64> {
        Some(self.state_dim)
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}
