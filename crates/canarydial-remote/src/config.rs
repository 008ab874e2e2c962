//! Configuration for the remote rollout source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde-facing configuration for a remotely refreshed rollout.
///
/// Durations are human-readable strings like `"5s"`, `"500ms"`, or `"2m"`;
/// they are parsed when the rollout is built, and an unparseable value
/// fails the build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRolloutConfig {
    /// Table holding canary rollout records.
    pub table: String,
    /// Application identifier, used as the partition key value.
    pub application: String,
    /// Delay between refresh attempts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// How long fetches may keep failing before the rollout drops to 0.0.
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: String,
}

fn default_poll_interval() -> String {
    "5s".to_string()
}

fn default_unhealthy_after() -> String {
    "60s".to_string()
}

/// Parse a duration string like "5s", "500ms", "2m", or a plain number of
/// seconds.
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(millis) = s.strip_suffix("ms") {
        return millis.parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    s.parse().ok().map(Duration::from_secs)
}
