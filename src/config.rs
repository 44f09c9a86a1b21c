use serde::{Deserialize, Serialize};

/// Timing parameters of one command issuance. Defaults follow common field
/// practice (5 s per protocol phase, 100 ms latch poll); tests inject short
/// values instead of waiting on wall-clock seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueConfig {
    /// TCP connection establishment timeout (ms)
    #[serde(default = "IssueConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on the STARTDT confirmation wait (ms)
    #[serde(default = "IssueConfig::default_dt_confirm_timeout_ms")]
    pub dt_confirm_timeout_ms: u64,
    /// Bound on the command confirmation wait (ms)
    #[serde(default = "IssueConfig::default_command_confirm_timeout_ms")]
    pub command_confirm_timeout_ms: u64,
    /// Latch poll interval of the bounded waiter (ms)
    #[serde(default = "IssueConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace pause after a failed connect, letting in-flight teardown settle (ms)
    #[serde(default = "IssueConfig::default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,
}

impl IssueConfig {
    fn default_connect_timeout_ms() -> u64 {
        5000
    }

    fn default_dt_confirm_timeout_ms() -> u64 {
        5000
    }

    fn default_command_confirm_timeout_ms() -> u64 {
        5000
    }

    fn default_poll_interval_ms() -> u64 {
        100
    }

    fn default_teardown_grace_ms() -> u64 {
        1000
    }
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            dt_confirm_timeout_ms: Self::default_dt_confirm_timeout_ms(),
            command_confirm_timeout_ms: Self::default_command_confirm_timeout_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            teardown_grace_ms: Self::default_teardown_grace_ms(),
        }
    }
}
