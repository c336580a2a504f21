//! Payoff-matrix view of a 2-agent matrix game, for debugging.

use std::fmt;

/// Learned values for every joint action of a 2-agent game.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoffMatrix {
    /// `cells[i][j]` holds `(q_agent0, q_agent1, q_mixed)` for joint action
    /// `(i, j)`. `q_mixed` is `None` without a mixer.
    pub cells: Vec<Vec<(f64, f64, Option<f64>)>>,
    /// Actions taken by both agents on the first step of the first episode.
    pub taken_actions: (i64, i64),
    /// Reward observed on that step.
    pub reward: f64,
}

impl fmt::Display for PayoffMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            for &(q0, q1, mixed) in row {
                match mixed {
                    Some(q) => write!(f, "{q0:.4}||{q1:.4}||{q:.4}     ")?,
                    None => write!(f, "{q0:.4}||{q1:.4}||-     ")?,
                }
            }
            writeln!(f)?;
        }
        write!(
            f,
            "Taken actions: {} {}  ||  Reward is {:.4}",
            self.taken_actions.0, self.taken_actions.1, self.reward
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_line_per_row() {
        let matrix = PayoffMatrix {
            cells: vec![
                vec![(1.0, 2.0, Some(3.0)), (0.5, 0.25, Some(0.75))],
                vec![(0.0, 0.0, Some(0.0)), (-1.0, -1.0, Some(-2.0))],
            ],
            taken_actions: (1, 0),
            reward: 8.0,
        };
        let text = matrix.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("1.0000||2.0000||3.0000"));
        assert!(lines[1].contains("-1.0000||-1.0000||-2.0000"));
        assert_eq!(lines[2], "Taken actions: 1 0  ||  Reward is 8.0000");
    }

    #[test]
    fn renders_placeholder_without_mixer() {
        let matrix = PayoffMatrix {
            cells: vec![vec![(1.0, 2.0, None)]],
            taken_actions: (0, 0),
            reward: 0.0,
        };
        assert!(matrix.to_string().starts_with("1.0000||2.0000||-"));
    }
}
