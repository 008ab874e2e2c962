//! Canarydial remote rollout — a continuously refreshed canary fraction.
//!
//! This crate provides [`RemoteRollout`], a rollout source whose value is
//! perpetually re-fetched from a record store by a background task. Fetch
//! failures are tolerated for a configured health window; once failures
//! persist past the window, the published value is retracted to 0.0 so a
//! degraded store results in no canary traffic rather than unknown canary
//! traffic. Readers never block on network activity.
//!
//! # Components
//!
//! - **`config`** — serde-facing configuration with string durations
//! - **`fetch`** — the point lookup and parse protocol, `FetchError`
//! - **`health`** — health window and per-iteration publish decision
//! - **`remote`** — `RemoteRollout`, its builder, and the refresh loop

pub mod config;
pub mod fetch;
pub mod health;
pub mod remote;

pub use config::RemoteRolloutConfig;
pub use fetch::FetchError;
pub use health::{HealthWindow, RefreshState};
pub use remote::{BuildError, NoopMonitor, RefreshMonitor, RemoteRollout, RemoteRolloutBuilder};
