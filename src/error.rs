use thiserror::Error;

/// Errors raised by the learner and its collaborators.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("Mixer {0} not recognised")]
    UnknownMixer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Degenerate batch: no valid timesteps left after masking")]
    DegenerateBatch,

    #[error("Episode batch needs at least 2 timesteps, got {0}")]
    EpisodeTooShort(i64),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    Shape {
        what: &'static str,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Tensor {name} missing from {path}")]
    MissingTensor { name: String, path: String },

    #[error(transparent)]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, LearnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mixer_display() {
        let e = LearnerError::UnknownMixer("qtran".to_string());
        assert_eq!(e.to_string(), "Mixer qtran not recognised");
    }

    #[test]
    fn degenerate_batch_display() {
        let e = LearnerError::DegenerateBatch;
        assert!(e.to_string().contains("no valid timesteps"));
    }

    #[test]
    fn shape_display_lists_dims() {
        let e = LearnerError::Shape {
            what: "reward",
            expected: vec![2, 3, 1],
            actual: vec![2, 4, 1],
        };
        let s = e.to_string();
        assert!(s.contains("reward"));
        assert!(s.contains("[2, 3, 1]"));
        assert!(s.contains("[2, 4, 1]"));
    }
}
