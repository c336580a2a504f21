//! Multi-agent controllers (MACs) and rollouts over episode batches.

pub mod basic;
pub mod trait_;

pub use basic::{BasicMac, BasicMacConfig, RnnAgent};
pub use trait_::{Controller, Rollout, AGENT_FILE};

use tch::Tensor;

/// Value written over unavailable actions so a max never selects them.
pub const UNAVAILABLE_ACTION_VALUE: f64 = -9_999_999.0;

/// Replaces values of actions marked 0 in `avail_actions` with
/// [`UNAVAILABLE_ACTION_VALUE`].
pub fn mask_unavailable(values: &Tensor, avail_actions: &Tensor) -> Tensor {
    values.masked_fill(&avail_actions.eq(0.0), UNAVAILABLE_ACTION_VALUE)
}

/// Index of the highest-valued available action along the last dimension.
///
/// `values` and `avail_actions` share shape `[..., A]`; the result keeps a
/// trailing dimension of size 1 so it can be fed to `gather`.
pub fn greedy_actions(values: &Tensor, avail_actions: &Tensor) -> Tensor {
    mask_unavailable(&values.detach(), avail_actions).argmax(-1, true)
}
