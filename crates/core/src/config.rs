// Controller configuration

use crate::engine::EngineOptions;
use crate::state::FinishMode;
use std::time::Duration;

/// Default position report cadence (milliseconds)
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 200;

/// How long a caller waits for the runtime to answer a command
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Defaults applied to every controller a runtime creates
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub report_interval: Duration,
    pub finish_mode: FinishMode,
    pub command_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_millis(DEFAULT_REPORT_INTERVAL_MS),
            finish_mode: FinishMode::default(),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

impl PlayerConfig {
    /// Zero is ignored; the previous interval stays.
    pub fn with_report_interval_ms(mut self, interval_ms: u64) -> Self {
        if interval_ms > 0 {
            self.report_interval = Duration::from_millis(interval_ms);
        }
        self
    }

    pub fn with_finish_mode(mut self, mode: FinishMode) -> Self {
        self.finish_mode = mode;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Per-prepare options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PrepareOptions {
    /// Routed through the volume/suppression mapping, never raw gain
    pub volume: Option<f64>,
    /// Overrides the report cadence when positive
    pub report_interval_ms: Option<i64>,
    pub engine: EngineOptions,
}

impl PrepareOptions {
    pub(crate) fn report_interval(&self) -> Option<Duration> {
        match self.report_interval_ms {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            Some(ms) => {
                log::warn!("ignoring non-positive report interval {}ms", ms);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.report_interval, Duration::from_millis(200));
        assert_eq!(config.finish_mode, FinishMode::StopAndRelease);
    }

    #[test]
    fn test_zero_interval_keeps_previous() {
        let config = PlayerConfig::default()
            .with_report_interval_ms(50)
            .with_report_interval_ms(0);
        assert_eq!(config.report_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_prepare_interval() {
        let mut options = PrepareOptions::default();
        assert_eq!(options.report_interval(), None);
        options.report_interval_ms = Some(-5);
        assert_eq!(options.report_interval(), None);
        options.report_interval_ms = Some(100);
        assert_eq!(options.report_interval(), Some(Duration::from_millis(100)));
    }
}
