//! RMSprop over named parameters, with state that can be saved and restored.
//!
//! `tch`'s built-in optimizers keep their buffers inside libtorch, out of
//! reach for checkpointing. This one keeps the squared-gradient averages as
//! plain tensors keyed by parameter name.

use std::path::Path;

use tch::{nn, Device, Tensor};

use crate::error::{LearnerError, Result};

/// File name of the optimizer artifact inside a save directory.
pub const OPTIMIZER_FILE: &str = "opt.ot";

/// Collects the trainable variables of `vs`, prefixed and sorted by name.
pub fn named_parameters(prefix: &str, vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let mut params: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .filter(|(_, t)| t.requires_grad())
        .map(|(name, t)| (format!("{prefix}.{name}"), t))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

/// RMSprop with PyTorch semantics (no momentum, not centered).
///
/// ```text
/// sq ← α·sq + (1 − α)·g²
/// p  ← p − lr·g / (√sq + ε)
/// ```
pub struct RmsProp {
    params: Vec<(String, Tensor)>,
    square_avg: Vec<Tensor>,
    lr: f64,
    alpha: f64,
    eps: f64,
}

impl RmsProp {
    /// Creates the optimizer with zeroed state.
    pub fn new(params: Vec<(String, Tensor)>, lr: f64, alpha: f64, eps: f64) -> Self {
        let square_avg = tch::no_grad(|| params.iter().map(|(_, p)| p.zeros_like()).collect());
        Self {
            params,
            square_avg,
            lr,
            alpha,
            eps,
        }
    }

    /// Number of optimized tensors.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when there is nothing to optimize.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Squared-gradient averages keyed by parameter name.
    pub fn named_state(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.params
            .iter()
            .zip(self.square_avg.iter())
            .map(|((name, _), sq)| (name.as_str(), sq))
    }

    /// Zeroes the gradient of every parameter.
    pub fn zero_grad(&mut self) {
        for (_, p) in self.params.iter_mut() {
            p.zero_grad();
        }
    }

    /// Global L2 norm of all gradients.
    pub fn grad_norm(&self) -> f64 {
        tch::no_grad(|| {
            self.params
                .iter()
                .map(|(_, p)| p.grad())
                .filter(Tensor::defined)
                .map(|g| g.norm().double_value(&[]).powi(2))
                .sum::<f64>()
                .sqrt()
        })
    }

    /// Rescales gradients so their global norm is at most `max_norm`.
    ///
    /// Returns the norm measured before clipping.
    pub fn clip_grad_norm(&mut self, max_norm: f64) -> f64 {
        let total = self.grad_norm();
        let coef = max_norm / (total + 1e-6);
        if coef < 1.0 {
            tch::no_grad(|| {
                for (_, p) in self.params.iter() {
                    let mut grad = p.grad();
                    if grad.defined() {
                        let scaled = &grad * coef;
                        grad.copy_(&scaled);
                    }
                }
            });
        }
        total
    }

    /// Applies one update using the current gradients.
    pub fn step(&mut self) {
        let (lr, alpha, eps) = (self.lr, self.alpha, self.eps);
        tch::no_grad(|| {
            for ((_, p), sq) in self.params.iter_mut().zip(self.square_avg.iter_mut()) {
                let grad = p.grad();
                if !grad.defined() {
                    continue;
                }
                let new_sq = &*sq * alpha + grad.pow_tensor_scalar(2.0) * (1.0 - alpha);
                sq.copy_(&new_sq);
                let update = &grad / (new_sq.sqrt() + eps) * lr;
                let updated = &*p - update;
                p.copy_(&updated);
            }
        });
    }

    /// Writes the optimizer state to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let named: Vec<(&str, &Tensor)> = self.named_state().collect();
        Tensor::save_multi(&named, path)?;
        Ok(())
    }

    /// Restores optimizer state from `path`, mapped onto the parameters'
    /// current device. Every parameter must have an entry; on error the
    /// current state is left unchanged.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let state = self.read_state(path)?;
        self.restore(state)
    }

    /// Reads and checks the state saved at `path` without applying it.
    ///
    /// The result is ordered like the parameters and can be applied with
    /// [`RmsProp::restore`].
    pub fn read_state(&self, path: &Path) -> Result<Vec<Tensor>> {
        let device = self
            .params
            .first()
            .map_or(Device::Cpu, |(_, p)| p.device());
        let mut saved = Tensor::load_multi_with_device(path, device)?;
        self.params
            .iter()
            .map(|(name, param)| {
                let pos = saved
                    .iter()
                    .position(|(n, _)| n == name)
                    .ok_or_else(|| LearnerError::MissingTensor {
                        name: name.clone(),
                        path: path.display().to_string(),
                    })?;
                let (_, value) = saved.swap_remove(pos);
                if value.size() != param.size() {
                    return Err(LearnerError::Shape {
                        what: "optimizer state",
                        expected: param.size(),
                        actual: value.size(),
                    });
                }
                Ok(value)
            })
            .collect()
    }

    /// Replaces the squared-gradient averages with `state`, in parameter
    /// order.
    pub fn restore(&mut self, state: Vec<Tensor>) -> Result<()> {
        if state.len() != self.square_avg.len() {
            return Err(LearnerError::Shape {
                what: "optimizer state entries",
                expected: vec![self.square_avg.len() as i64],
                actual: vec![state.len() as i64],
            });
        }
        tch::no_grad(|| -> Result<()> {
            for (sq, value) in self.square_avg.iter_mut().zip(state.iter()) {
                sq.f_copy_(value)?;
            }
            Ok(())
        })
    }

    /// Moves optimizer state to `device`.
    pub fn to_device(&mut self, device: Device) {
        for sq in self.square_avg.iter_mut() {
            *sq = sq.to_device(device);
        }
    }
}
