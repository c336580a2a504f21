//! Recurrent controller with parameters shared across agents.
//!
//! Each agent sees its own observation, optionally its previous action and
//! a one-hot agent id. A single GRU agent network processes all agents in
//! parallel by folding the agent dimension into the batch.

use tch::nn::{self, Module, RNN};
use tch::{Device, Kind, Tensor};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::trait_::Controller;
use crate::batch::EpisodeBatch;
use crate::error::{LearnerError, Result};

/// Architecture of a [`BasicMac`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicMacConfig {
    /// Number of agents.
    pub n_agents: usize,
    /// Discrete actions per agent.
    pub n_actions: usize,
    /// Per-agent observation size.
    pub obs_shape: usize,
    /// GRU hidden width.
    pub rnn_hidden_dim: usize,
    /// Append the one-hot previous action to the input.
    pub obs_last_action: bool,
    /// Append a one-hot agent id to the input.
    pub obs_agent_id: bool,
}

impl BasicMacConfig {
    /// Width of the per-agent network input.
    pub fn input_shape(&self) -> usize {
        let mut shape = self.obs_shape;
        if self.obs_last_action {
            shape += self.n_actions;
        }
        if self.obs_agent_id {
            shape += self.n_agents;
        }
        shape
    }
}

/// Agent network: `input → hidden → GRU → action values`.
pub struct RnnAgent {
    fc1: nn::Linear,
    rnn: nn::GRU,
    fc2: nn::Linear,
}

impl RnnAgent {
    /// Creates the agent network under `p`.
    pub fn new(p: &nn::Path, input_shape: i64, hidden_dim: i64, n_actions: i64) -> Self {
        Self {
            fc1: nn::linear(p / "fc1", input_shape, hidden_dim, Default::default()),
            rnn: nn::gru(p / "rnn", hidden_dim, hidden_dim, Default::default()),
            fc2: nn::linear(p / "fc2", hidden_dim, n_actions, Default::default()),
        }
    }

    /// Zero hidden state for `batch_dim` rows.
    pub fn init_hidden(&self, batch_dim: i64) -> nn::GRUState {
        self.rnn.zero_state(batch_dim)
    }

    /// One recurrent step. `inputs` is `[rows, input_shape]`.
    pub fn forward(&self, inputs: &Tensor, hidden: &nn::GRUState) -> (Tensor, nn::GRUState) {
        let x = self.fc1.forward(inputs).relu();
        let h = self.rnn.step(&x, hidden);
        let q = self.fc2.forward(&h.0.squeeze_dim(0));
        (q, h)
    }
}

/// Basic multi-agent controller around a shared [`RnnAgent`].
pub struct BasicMac {
    vs: nn::VarStore,
    agent: RnnAgent,
    config: BasicMacConfig,
    hidden: Option<nn::GRUState>,
}

impl BasicMac {
    /// Assembles per-agent inputs for timestep `t`, shaped `[B·N, input_shape]`.
    fn build_inputs(&self, batch: &EpisodeBatch, t: i64) -> Tensor {
        let bs = batch.batch_size();
        let n_agents = self.config.n_agents as i64;
        let n_actions = self.config.n_actions as i64;
        let device = self.vs.device();

        let mut inputs = vec![batch.obs.select(1, t).to_kind(Kind::Float).to_device(device)];
        if self.config.obs_last_action {
            let last = if t == 0 {
                Tensor::zeros([bs, n_agents, n_actions], (Kind::Float, device))
            } else {
                batch
                    .actions
                    .select(1, t - 1)
                    .squeeze_dim(-1)
                    .one_hot(n_actions)
                    .to_kind(Kind::Float)
                    .to_device(device)
            };
            inputs.push(last);
        }
        if self.config.obs_agent_id {
            let ids = Tensor::eye(n_agents, (Kind::Float, device))
                .unsqueeze(0)
                .expand([bs, n_agents, n_agents], false);
            inputs.push(ids);
        }

        Tensor::cat(&inputs, -1).reshape([bs * n_agents, -1])
    }
}

impl Controller for BasicMac {
    type Config = BasicMacConfig;

    fn new(config: &BasicMacConfig, device: Device) -> Result<Self> {
        if config.n_agents == 0 || config.n_actions == 0 || config.rnn_hidden_dim == 0 {
            return Err(LearnerError::InvalidConfig(format!(
                "controller dimensions must be positive: {config:?}"
            )));
        }
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let agent = RnnAgent::new(
            &(p / "agent"),
            config.input_shape() as i64,
            config.rnn_hidden_dim as i64,
            config.n_actions as i64,
        );
        Ok(Self {
            vs,
            agent,
            config: config.clone(),
            hidden: None,
        })
    }

    fn config(&self) -> &BasicMacConfig {
        &self.config
    }

    fn n_actions(&self) -> i64 {
        self.config.n_actions as i64
    }

    fn obs_shape(&self) -> i64 {
        self.config.obs_shape as i64
    }

    fn init_hidden(&mut self, batch_size: i64) {
        let rows = batch_size * self.config.n_agents as i64;
        self.hidden = Some(self.agent.init_hidden(rows));
    }

    fn forward(&mut self, batch: &EpisodeBatch, t: i64) -> Tensor {
        let bs = batch.batch_size();
        let inputs = self.build_inputs(batch, t);
        let hidden = match self.hidden.take() {
            Some(h) => h,
            None => self.agent.init_hidden(bs * self.config.n_agents as i64),
        };
        let (q, hidden) = self.agent.forward(&inputs, &hidden);
        self.hidden = Some(hidden);
        q.view([bs, self.config.n_agents as i64, -1])
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn to_device(&mut self, device: Device) {
        self.vs.set_device(device);
        self.hidden = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::fixtures::constant_batch;
    use crate::controller::Rollout;

    fn config() -> BasicMacConfig {
        BasicMacConfig {
            n_agents: 2,
            n_actions: 3,
            obs_shape: 4,
            rnn_hidden_dim: 8,
            obs_last_action: true,
            obs_agent_id: true,
        }
    }

    #[test]
    fn input_shape_counts_optional_features() {
        let mut cfg = config();
        assert_eq!(cfg.input_shape(), 4 + 3 + 2);
        cfg.obs_last_action = false;
        cfg.obs_agent_id = false;
        assert_eq!(cfg.input_shape(), 4);
    }

    #[test]
    fn zero_sized_controller_is_rejected() {
        let cfg = BasicMacConfig {
            n_actions: 0,
            ..config()
        };
        assert!(BasicMac::new(&cfg, Device::Cpu).is_err());
    }

    #[test]
    fn forward_shape() {
        let mut mac = BasicMac::new(&config(), Device::Cpu).unwrap();
        let batch = constant_batch(5, 3, 2, 3, 4, 6, 0.0);
        mac.init_hidden(batch.batch_size());
        let q = mac.forward(&batch, 0);
        assert_eq!(q.size(), &[5, 2, 3]);
    }

    #[test]
    fn rollout_stacks_over_time() {
        let mut mac = BasicMac::new(&config(), Device::Cpu).unwrap();
        let batch = constant_batch(2, 4, 2, 3, 4, 6, 0.0);
        let rollout = Rollout::new(&mut mac, &batch);
        assert_eq!(rollout.len(), 4);
        let out = rollout.stack();
        assert_eq!(out.size(), &[2, 4, 2, 3]);
    }

    #[test]
    fn rollout_restarts_hidden_state() {
        let mut mac = BasicMac::new(&config(), Device::Cpu).unwrap();
        let batch = constant_batch(2, 4, 2, 3, 4, 6, 0.0);
        let first = Rollout::new(&mut mac, &batch).stack();
        let second = Rollout::new(&mut mac, &batch).stack();
        assert!(first.allclose(&second, 1e-6, 1e-6, false));
    }

    #[test]
    fn load_state_makes_outputs_identical() {
        let mut live = BasicMac::new(&config(), Device::Cpu).unwrap();
        let mut target = BasicMac::new(live.config(), Device::Cpu).unwrap();
        target.load_state(&live).unwrap();

        let batch = constant_batch(3, 3, 2, 3, 4, 6, 0.0);
        let a = Rollout::new(&mut live, &batch).stack();
        let b = Rollout::new(&mut target, &batch).stack();
        assert!(a.equal(&b));
    }
}
