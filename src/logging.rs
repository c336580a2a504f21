//! Scalar stat sink used by learners.
//!
//! Stats are keyed by name and stamped with the environment step at which
//! they were produced. [`Logger`] keeps every series in memory and mirrors
//! each record to `tracing`.

use std::collections::HashMap;

/// Receiver for learner diagnostics.
pub trait StatsLogger {
    /// Records one scalar `value` for `key` at environment step `t_env`.
    fn log_stat(&mut self, key: &str, value: f64, t_env: u64);

    /// Emits a human-readable notice.
    fn info(&mut self, msg: &str);
}

/// In-memory stat store backed by `tracing` output.
#[derive(Debug, Default)]
pub struct Logger {
    stats: HashMap<String, Vec<(u64, f64)>>,
    messages: Vec<String>,
}

impl Logger {
    /// Number of trailing entries averaged by [`Logger::print_recent_stats`].
    pub const RECENT_WINDOW: usize = 5;

    /// Creates an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full `(t_env, value)` series recorded for `key`.
    pub fn series(&self, key: &str) -> Option<&[(u64, f64)]> {
        self.stats.get(key).map(Vec::as_slice)
    }

    /// Most recent value recorded for `key`.
    pub fn last(&self, key: &str) -> Option<f64> {
        self.stats
            .get(key)
            .and_then(|s| s.last())
            .map(|&(_, v)| v)
    }

    /// Informational messages, oldest first.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Number of values recorded for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.stats.get(key).map_or(0, Vec::len)
    }

    /// Logs the windowed mean of every series, sorted by key.
    pub fn print_recent_stats(&self) {
        let mut keys: Vec<&String> = self.stats.keys().collect();
        keys.sort();
        for key in keys {
            let series = &self.stats[key];
            let window = &series[series.len().saturating_sub(Self::RECENT_WINDOW)..];
            if window.is_empty() {
                continue;
            }
            let mean = window.iter().map(|&(_, v)| v).sum::<f64>() / window.len() as f64;
            let t_env = window[window.len() - 1].0;
            tracing::info!(t_env, "{:<20} {:.4}", key, mean);
        }
    }
}

impl StatsLogger for Logger {
    fn log_stat(&mut self, key: &str, value: f64, t_env: u64) {
        tracing::debug!(stat = key, value, t_env);
        self.stats
            .entry(key.to_string())
            .or_default()
            .push((t_env, value));
    }

    fn info(&mut self, msg: &str) {
        tracing::info!("{}", msg);
        self.messages.push(msg.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_series_in_order() {
        let mut logger = Logger::new();
        logger.log_stat("loss", 1.0, 10);
        logger.log_stat("loss", 0.5, 20);
        logger.log_stat("grad_norm", 3.0, 20);

        assert_eq!(logger.series("loss").unwrap(), &[(10, 1.0), (20, 0.5)]);
        assert_eq!(logger.last("loss"), Some(0.5));
        assert_eq!(logger.count("grad_norm"), 1);
        assert_eq!(logger.last("missing"), None);
        assert_eq!(logger.count("missing"), 0);
    }

    #[test]
    fn keeps_info_messages() {
        let mut logger = Logger::new();
        logger.info("Updated target network");
        assert_eq!(logger.messages(), &["Updated target network".to_string()]);
    }

    #[test]
    fn print_recent_stats_handles_short_series() {
        let mut logger = Logger::new();
        logger.log_stat("q_taken_mean", 2.0, 1);
        logger.print_recent_stats();
        assert_eq!(logger.count("q_taken_mean"), 1);
    }
}
