//! Padded, time-major batch of multi-agent episodes.

use tch::{Device, Kind, Tensor};

use crate::error::{LearnerError, Result};

/// A batch of episodes padded to a common length.
///
/// Dimensions: `B` episodes, `T` timesteps, `N` agents, `A` actions,
/// `O` observation features, `S` state features.
#[derive(Debug)]
pub struct EpisodeBatch {
    /// Per-agent observations, `[B, T, N, O]`.
    pub obs: Tensor,
    /// Global state, `[B, T, S]`.
    pub state: Tensor,
    /// Action index taken by each agent, `[B, T, N, 1]` (int64).
    pub actions: Tensor,
    /// 1 where an action is legal, 0 otherwise, `[B, T, N, A]`.
    pub avail_actions: Tensor,
    /// Shared team reward, `[B, T, 1]`.
    pub reward: Tensor,
    /// 1 on the terminal step, `[B, T, 1]`.
    pub terminated: Tensor,
    /// 1 on real steps, 0 on padding, `[B, T, 1]`.
    pub filled: Tensor,
}

impl EpisodeBatch {
    /// Number of episodes.
    pub fn batch_size(&self) -> i64 {
        self.reward.size()[0]
    }

    /// Padded episode length.
    pub fn max_seq_length(&self) -> i64 {
        self.reward.size()[1]
    }

    /// Number of agents.
    pub fn n_agents(&self) -> i64 {
        self.avail_actions.size()[2]
    }

    /// Number of discrete actions per agent.
    pub fn n_actions(&self) -> i64 {
        self.avail_actions.size()[3]
    }

    /// Device the batch tensors live on.
    pub fn device(&self) -> Device {
        self.reward.device()
    }

    /// Copies every field to `device`.
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            obs: self.obs.to_device(device),
            state: self.state.to_device(device),
            actions: self.actions.to_device(device),
            avail_actions: self.avail_actions.to_device(device),
            reward: self.reward.to_device(device),
            terminated: self.terminated.to_device(device),
            filled: self.filled.to_device(device),
        }
    }

    /// Checks that all fields agree on `B`, `T` and `N`, and that actions are
    /// integer indices.
    pub fn validate(&self) -> Result<()> {
        let reward = self.reward.size();
        if reward.len() != 3 || reward[2] != 1 {
            return Err(LearnerError::Shape {
                what: "reward",
                expected: vec![-1, -1, 1],
                actual: reward,
            });
        }
        let (b, t) = (reward[0], reward[1]);
        if t < 2 {
            return Err(LearnerError::EpisodeTooShort(t));
        }

        check_exact("terminated", &self.terminated, &[b, t, 1])?;
        check_exact("filled", &self.filled, &[b, t, 1])?;

        let avail = self.avail_actions.size();
        if avail.len() != 4 || avail[0] != b || avail[1] != t {
            return Err(LearnerError::Shape {
                what: "avail_actions",
                expected: vec![b, t, -1, -1],
                actual: avail,
            });
        }
        let n = avail[2];

        check_exact("actions", &self.actions, &[b, t, n, 1])?;
        if self.actions.kind() != Kind::Int64 {
            return Err(LearnerError::InvalidConfig(format!(
                "actions must be int64 indices, got {:?}",
                self.actions.kind()
            )));
        }
        check_prefix("obs", &self.obs, &[b, t, n], 4)?;
        check_prefix("state", &self.state, &[b, t], 3)?;
        Ok(())
    }
}

fn check_exact(what: &'static str, tensor: &Tensor, expected: &[i64]) -> Result<()> {
    let actual = tensor.size();
    if actual != expected {
        return Err(LearnerError::Shape {
            what,
            expected: expected.to_vec(),
            actual,
        });
    }
    Ok(())
}

fn check_prefix(what: &'static str, tensor: &Tensor, prefix: &[i64], rank: usize) -> Result<()> {
    let actual = tensor.size();
    if actual.len() != rank || actual[..prefix.len()] != *prefix {
        let mut expected = prefix.to_vec();
        expected.resize(rank, -1);
        return Err(LearnerError::Shape {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::constant_batch;
    use super::*;

    #[test]
    fn dims_are_read_from_fields() {
        let batch = constant_batch(2, 3, 4, 5, 6, 7, 1.0);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.max_seq_length(), 3);
        assert_eq!(batch.n_agents(), 4);
        assert_eq!(batch.n_actions(), 5);
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn single_step_episode_is_rejected() {
        let batch = constant_batch(2, 1, 2, 2, 3, 3, 1.0);
        assert!(matches!(
            batch.validate(),
            Err(LearnerError::EpisodeTooShort(1))
        ));
    }

    #[test]
    fn mismatched_filled_is_rejected() {
        let mut batch = constant_batch(2, 3, 2, 2, 3, 3, 1.0);
        batch.filled = Tensor::ones([2, 4, 1], (Kind::Float, Device::Cpu));
        match batch.validate() {
            Err(LearnerError::Shape { what, .. }) => assert_eq!(what, "filled"),
            other => panic!("expected shape error, got {other:?}"),
        }
    }

    #[test]
    fn float_actions_are_rejected() {
        let mut batch = constant_batch(2, 3, 2, 2, 3, 3, 1.0);
        batch.actions = batch.actions.to_kind(Kind::Float);
        assert!(matches!(
            batch.validate(),
            Err(LearnerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn obs_with_wrong_agent_count_is_rejected() {
        let mut batch = constant_batch(2, 3, 2, 2, 3, 3, 1.0);
        batch.obs = Tensor::zeros([2, 3, 5, 3], (Kind::Float, Device::Cpu));
        match batch.validate() {
            Err(LearnerError::Shape { what, expected, .. }) => {
                assert_eq!(what, "obs");
                assert_eq!(expected, vec![2, 3, 2, -1]);
            }
            other => panic!("expected shape error, got {other:?}"),
        }
    }
}
