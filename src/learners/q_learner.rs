//! Value-based multi-agent TD learner (independent Q-learning, VDN, QMIX).
//!
//! One call to [`QLearner::train`] performs a single gradient step on a
//! batch of padded episodes:
//!
//! 1. Roll the live controller over the whole batch and pick the values of
//!    the actions actually taken.
//! 2. Roll the target controller over the same batch and take the value of
//!    the best available successor action (double-Q uses the live network to
//!    choose that action).
//! 3. Optionally mix per-agent values into joint values.
//! 4. Regress towards `r + γ(1 − terminated)·Q_target` over valid steps only.
//!
//! Target networks are refreshed by hard copy every
//! `target_update_interval` episodes.

use std::fs;
use std::path::Path;

use tch::{Device, Kind, Tensor};

use super::optimizer::{named_parameters, RmsProp, OPTIMIZER_FILE};
use super::payoff::PayoffMatrix;
use super::Learner;
use crate::batch::EpisodeBatch;
use crate::config::LearnerConfig;
use crate::controller::{greedy_actions, mask_unavailable, Controller, Rollout};
use crate::error::{LearnerError, Result};
use crate::logging::{Logger, StatsLogger};
use crate::mixer::{build_mixer, Mixer, MIXER_FILE};

/// Marks steps that contribute to the loss.
///
/// `filled` and `terminated` are `[B, T, 1]`. A step is valid when it is not
/// padding and no earlier step of the same episode was terminal.
pub fn valid_mask(filled: &Tensor, terminated: &Tensor) -> Tensor {
    let terminated = terminated.to_kind(Kind::Float);
    let prior_terminal = terminated.cumsum(1, Kind::Float) - &terminated;
    filled.to_kind(Kind::Float) * prior_terminal.le(0.0).to_kind(Kind::Float)
}

/// Entropy of the categorical distribution whose logits are the last
/// dimension of `logits`.
pub fn categorical_entropy(logits: &Tensor) -> Tensor {
    let log_probs = logits.log_softmax(-1, Kind::Float);
    let probs = log_probs.exp();
    -(probs * log_probs).sum_dim_intlist([-1].as_slice(), false, Kind::Float)
}

/// TD learner over a recurrent multi-agent controller.
pub struct QLearner<C: Controller, L: StatsLogger = Logger> {
    config: LearnerConfig,
    mac: C,
    target_mac: C,
    mixer: Option<Box<dyn Mixer>>,
    target_mixer: Option<Box<dyn Mixer>>,
    optimiser: RmsProp,
    logger: L,
    last_target_update_episode: u64,
    log_stats_t: i64,
}

impl<C: Controller, L: StatsLogger> QLearner<C, L> {
    /// Wraps `mac` in a learner.
    ///
    /// The target controller and target mixer are built from the same
    /// configuration as their live counterparts and then hard-synced.
    ///
    /// # Errors
    ///
    /// Fails on an unrecognised mixer, a zero target interval, or when a
    /// network cannot be built.
    pub fn new(mac: C, logger: L, config: LearnerConfig) -> Result<Self> {
        let mixer_kind = config.mixer_kind()?;
        if config.target_update_interval == 0 {
            return Err(LearnerError::InvalidConfig(
                "target_update_interval must be at least 1".to_string(),
            ));
        }

        let device = mac.var_store().device();
        let mut target_mac = C::new(mac.config(), device)?;
        target_mac.load_state(&mac)?;

        let (mixer, target_mixer) = match mixer_kind {
            Some(kind) => {
                let mixer = build_mixer(kind, &config, device)?;
                let mut target_mixer = build_mixer(kind, &config, device)?;
                target_mixer.load_state(mixer.as_ref())?;
                (Some(mixer), Some(target_mixer))
            }
            None => (None, None),
        };

        let mut params = named_parameters("mac", mac.var_store());
        if let Some(mixer) = &mixer {
            params.extend(named_parameters("mixer", mixer.var_store()));
        }
        let optimiser = RmsProp::new(params, config.lr, config.optim_alpha, config.optim_eps);

        // Ensures the first call to `train` emits stats.
        let log_stats_t = -(config.learner_log_interval as i64) - 1;

        Ok(Self {
            config,
            mac,
            target_mac,
            mixer,
            target_mixer,
            optimiser,
            logger,
            last_target_update_episode: 0,
            log_stats_t,
        })
    }

    /// Learner hyperparameters.
    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Live controller.
    pub fn mac(&self) -> &C {
        &self.mac
    }

    /// Mutable live controller, e.g. for action selection by a runner.
    pub fn mac_mut(&mut self) -> &mut C {
        &mut self.mac
    }

    /// Target controller.
    pub fn target_mac(&self) -> &C {
        &self.target_mac
    }

    /// Live mixer, if any.
    pub fn mixer(&self) -> Option<&dyn Mixer> {
        self.mixer.as_deref()
    }

    /// Target mixer, if any.
    pub fn target_mixer(&self) -> Option<&dyn Mixer> {
        self.target_mixer.as_deref()
    }

    /// Optimizer over live controller and mixer parameters.
    pub fn optimiser(&self) -> &RmsProp {
        &self.optimiser
    }

    /// Stat sink.
    pub fn logger(&self) -> &L {
        &self.logger
    }

    /// Episode count at which targets were last synced.
    pub fn last_target_update_episode(&self) -> u64 {
        self.last_target_update_episode
    }

    fn check_batch(&self, batch: &EpisodeBatch) -> Result<()> {
        batch.validate()?;
        let n_agents = self.config.n_agents as i64;
        if batch.n_agents() != n_agents {
            return Err(LearnerError::Shape {
                what: "agents",
                expected: vec![n_agents],
                actual: vec![batch.n_agents()],
            });
        }
        let n_actions = self.mac.n_actions();
        if batch.n_actions() != n_actions {
            return Err(LearnerError::Shape {
                what: "action count",
                expected: vec![n_actions],
                actual: vec![batch.n_actions()],
            });
        }
        let obs_width = batch.obs.size()[3];
        if obs_width != self.mac.obs_shape() {
            return Err(LearnerError::Shape {
                what: "observation features",
                expected: vec![self.mac.obs_shape()],
                actual: vec![obs_width],
            });
        }
        if let Some(state_dim) = self.mixer.as_ref().and_then(|m| m.state_dim()) {
            let actual = batch.state.size()[2];
            if actual != state_dim {
                return Err(LearnerError::Shape {
                    what: "state features",
                    expected: vec![state_dim],
                    actual: vec![actual],
                });
            }
        }
        Ok(())
    }

    /// Performs one TD update on `batch`.
    ///
    /// `t_env` is the environment step count used for stat cadence and
    /// timestamps; `episode_num` drives target syncs.
    ///
    /// # Errors
    ///
    /// [`LearnerError::DegenerateBatch`] when no step survives masking; the
    /// networks are left untouched in that case.
    pub fn train(&mut self, batch: &EpisodeBatch, t_env: u64, episode_num: u64) -> Result<()> {
        self.check_batch(batch)?;
        let t_len = batch.max_seq_length();

        // Targets need one fewer step than observations
        let rewards = batch.reward.narrow(1, 0, t_len - 1).to_kind(Kind::Float);
        let actions = batch.actions.narrow(1, 0, t_len - 1);
        let terminated = batch.terminated.narrow(1, 0, t_len - 1).to_kind(Kind::Float);
        let mask = valid_mask(&batch.filled.narrow(1, 0, t_len - 1), &terminated);
        let avail_actions = &batch.avail_actions;

        let mac_out = Rollout::new(&mut self.mac, batch).stack();
        let entropy = categorical_entropy(&mac_out.detach());

        let agent_qvals = mac_out
            .narrow(1, 0, t_len - 1)
            .gather(3, &actions, false)
            .squeeze_dim(3);

        let double_q = self.config.double_q;
        let target_mac = &mut self.target_mac;
        let target_max_qvals = tch::no_grad(|| {
            // The first timestep only warms up the hidden state
            let outs: Vec<Tensor> = Rollout::new(target_mac, batch).skip(1).collect();
            let target_mac_out = mask_unavailable(
                &Tensor::stack(&outs, 1),
                &avail_actions.narrow(1, 1, t_len - 1),
            );
            if double_q {
                let cur_max_actions = greedy_actions(&mac_out, avail_actions).narrow(1, 1, t_len - 1);
                target_mac_out.gather(3, &cur_max_actions, false).squeeze_dim(3)
            } else {
                target_mac_out.max_dim(3, false).0
            }
        });

        let (chosen_action_qvals, target_qvals) = match (&self.mixer, &self.target_mixer) {
            (Some(mixer), Some(target_mixer)) => {
                let chosen = mixer.forward(&agent_qvals, &batch.state.narrow(1, 0, t_len - 1));
                let target = tch::no_grad(|| {
                    target_mixer.forward(&target_max_qvals, &batch.state.narrow(1, 1, t_len - 1))
                });
                (chosen, target)
            }
            _ => (agent_qvals.shallow_clone(), target_max_qvals.shallow_clone()),
        };

        let not_terminated = terminated.ones_like() - &terminated;
        let targets = &rewards + not_terminated * self.config.gamma * &target_qvals;

        let td_error = &chosen_action_qvals - targets.detach();
        let mask = mask.expand_as(&td_error);
        let masked_td_error = &td_error * &mask;

        let mask_elems = mask.sum(Kind::Float).double_value(&[]);
        if mask_elems <= 0.0 {
            return Err(LearnerError::DegenerateBatch);
        }
        let loss = masked_td_error.pow_tensor_scalar(2.0).sum(Kind::Float) / mask_elems;

        self.optimiser.zero_grad();
        loss.backward();
        let grad_norm = self.optimiser.clip_grad_norm(self.config.grad_norm_clip);
        self.optimiser.step();

        let since_sync = episode_num.saturating_sub(self.last_target_update_episode);
        if since_sync as f64 / self.config.target_update_interval as f64 >= 1.0 {
            self.sync_targets()?;
            self.last_target_update_episode = episode_num;
        }

        if t_env as i64 - self.log_stats_t >= self.config.learner_log_interval as i64 {
            let per_agent = mask_elems * self.config.n_agents as f64;
            let masked_mean = |x: &Tensor, denom: f64| {
                (x * &mask).sum(Kind::Float).double_value(&[]) / denom
            };
            let stats = [
                ("loss", loss.double_value(&[])),
                ("grad_norm", grad_norm),
                (
                    "td_error_abs",
                    masked_td_error.abs().sum(Kind::Float).double_value(&[]) / mask_elems,
                ),
                ("q_taken_mean", masked_mean(&chosen_action_qvals, per_agent)),
                ("target_mean", masked_mean(&targets, per_agent)),
                ("agent_utils", masked_mean(&agent_qvals, per_agent)),
                ("agent_target", masked_mean(&target_max_qvals, per_agent)),
                ("entropy_mean", entropy.mean(Kind::Float).double_value(&[])),
                ("entropy_std", entropy.std(true).double_value(&[])),
            ];
            for (key, value) in stats {
                self.logger.log_stat(key, value, t_env);
            }
            self.log_stats_t = t_env as i64;
        }

        Ok(())
    }

    /// Hard-copies live parameters into the target controller and mixer.
    pub fn sync_targets(&mut self) -> Result<()> {
        self.target_mac.load_state(&self.mac)?;
        if let (Some(mixer), Some(target_mixer)) = (&self.mixer, &mut self.target_mixer) {
            target_mixer.load_state(mixer.as_ref())?;
        }
        self.logger.info("Updated target network");
        Ok(())
    }

    /// Moves all four networks and the optimizer state to `device`.
    pub fn to_device(&mut self, device: Device) {
        self.mac.to_device(device);
        self.target_mac.to_device(device);
        if let Some(mixer) = self.mixer.as_mut() {
            mixer.to_device(device);
        }
        if let Some(target_mixer) = self.target_mixer.as_mut() {
            target_mixer.to_device(device);
        }
        self.optimiser.to_device(device);
    }

    /// Writes live controller, live mixer and optimizer state into `dir`.
    pub fn save_models(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.mac.save_models(dir)?;
        if let Some(mixer) = &self.mixer {
            mixer.save(&dir.join(MIXER_FILE))?;
        }
        self.optimiser.save(&dir.join(OPTIMIZER_FILE))?;
        Ok(())
    }

    /// Restores state written by [`QLearner::save_models`].
    ///
    /// The target controller is loaded from the live controller's artifact.
    /// The target mixer is left as is; call [`QLearner::sync_targets`] when
    /// live/target parity is needed. Every artifact is read before anything
    /// is overwritten, so a failed load leaves the learner unchanged.
    pub fn load_models(&mut self, dir: &Path) -> Result<()> {
        let device = self.mac.var_store().device();
        let mut mac = C::new(self.mac.config(), device)?;
        mac.load_models(dir)?;
        let mixer = match self.config.mixer_kind()? {
            Some(kind) => {
                let mut mixer = build_mixer(kind, &self.config, device)?;
                mixer.load(&dir.join(MIXER_FILE))?;
                Some(mixer)
            }
            None => None,
        };
        let opt_state = self.optimiser.read_state(&dir.join(OPTIMIZER_FILE))?;

        self.mac.load_state(&mac)?;
        self.target_mac.load_state(&mac)?;
        if let (Some(live), Some(loaded)) = (self.mixer.as_mut(), mixer.as_ref()) {
            live.load_state(loaded.as_ref())?;
        }
        self.optimiser.restore(opt_state)
    }

    /// Evaluates every joint action of a 2-agent game on the first step of
    /// the first episode.
    pub fn payoff_matrix(&mut self, batch: &EpisodeBatch) -> Result<PayoffMatrix> {
        self.check_batch(batch)?;
        if batch.n_agents() != 2 {
            return Err(LearnerError::Shape {
                what: "payoff matrix agents",
                expected: vec![2],
                actual: vec![batch.n_agents()],
            });
        }
        let t_len = batch.max_seq_length();
        let (bs, device) = (batch.batch_size(), batch.device());

        let mac = &mut self.mac;
        let mixer = self.mixer.as_deref();
        tch::no_grad(|| {
            let mac_out = Rollout::new(mac, batch).stack().narrow(1, 0, t_len - 1);
            let states = batch.state.narrow(1, 0, t_len - 1);
            let n_actions = mac_out.size()[3];

            let mut cells = Vec::with_capacity(n_actions as usize);
            for ai in 0..n_actions {
                let mut row = Vec::with_capacity(n_actions as usize);
                for aj in 0..n_actions {
                    let joint = Tensor::from_slice(&[ai, aj])
                        .to_device(device)
                        .view([1, 1, 2, 1])
                        .repeat([bs, t_len - 1, 1, 1]);
                    let chosen = mac_out.gather(3, &joint, false).squeeze_dim(3);
                    let mixed = mixer.map(|m| m.forward(&chosen, &states).double_value(&[0, 0, 0]));
                    row.push((
                        chosen.double_value(&[0, 0, 0]),
                        chosen.double_value(&[0, 0, 1]),
                        mixed,
                    ));
                }
                cells.push(row);
            }

            Ok(PayoffMatrix {
                cells,
                taken_actions: (
                    batch.actions.int64_value(&[0, 0, 0, 0]),
                    batch.actions.int64_value(&[0, 0, 1, 0]),
                ),
                reward: batch.reward.double_value(&[0, 0, 0]),
            })
        })
    }

    /// Sends the rendered payoff matrix to the logger.
    pub fn show_matrix_info(&mut self, batch: &EpisodeBatch, t_env: u64) -> Result<()> {
        let matrix = self.payoff_matrix(batch)?;
        self.logger
            .info(&format!("Episode {t_env}, the learned matrix payoff is:\n{matrix}"));
        Ok(())
    }
}

impl<C: Controller, L: StatsLogger> Learner for QLearner<C, L> {
    fn train(&mut self, batch: &EpisodeBatch, t_env: u64, episode_num: u64) -> Result<()> {
        QLearner::train(self, batch, t_env, episode_num)
    }

    fn cuda(&mut self) {
        let device = self.config.device();
        self.to_device(device);
    }

    fn save_models(&self, dir: &Path) -> Result<()> {
        QLearner::save_models(self, dir)
    }

    fn load_models(&mut self, dir: &Path) -> Result<()> {
        QLearner::load_models(self, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_drops_padding() {
        let filled = Tensor::from_slice(&[1.0f32, 1.0, 0.0]).view([1, 3, 1]);
        let terminated = Tensor::zeros([1, 3, 1], (Kind::Float, Device::Cpu));
        let mask = valid_mask(&filled, &terminated);
        assert_eq!(Vec::<f32>::try_from(mask.view([-1])).unwrap(), vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn mask_drops_steps_after_termination() {
        let filled = Tensor::ones([1, 4, 1], (Kind::Float, Device::Cpu));
        let terminated = Tensor::from_slice(&[0.0f32, 1.0, 0.0, 0.0]).view([1, 4, 1]);
        let mask = valid_mask(&filled, &terminated);
        // the terminal step itself still has a valid target
        assert_eq!(
            Vec::<f32>::try_from(mask.view([-1])).unwrap(),
            vec![1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn entropy_of_uniform_logits_is_log_n() {
        let logits = Tensor::zeros([1, 2], (Kind::Float, Device::Cpu));
        let h = categorical_entropy(&logits).double_value(&[0]);
        assert!((h - 2f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn entropy_of_skewed_logits_is_zero() {
        let logits = Tensor::from_slice(&[100.0f32, -100.0]).view([1, 2]);
        let h = categorical_entropy(&logits).double_value(&[0]);
        assert!(h.abs() < 1e-6);
    }
}
