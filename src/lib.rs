//! marl-td - value-based multi-agent reinforcement learning
//!
//! Centralized-training TD learners for cooperative teams: independent
//! Q-learning, VDN and QMIX over a recurrent per-agent controller, with
//! hard-synced target networks and masked losses over padded episodes.

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod learners;
pub mod logging;
pub mod mixer;

pub use batch::EpisodeBatch;
pub use config::{LearnerConfig, MixerKind};
pub use controller::{BasicMac, BasicMacConfig, Controller, Rollout};
pub use error::{LearnerError, Result};
pub use learners::{Learner, PayoffMatrix, QLearner};
pub use logging::{Logger, StatsLogger};
pub use mixer::{Mixer, QMixer, VdnMixer};
