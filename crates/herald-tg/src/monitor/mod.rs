//! The channel-monitoring and throttled-action-dispatch engine.

mod client;
mod executor;
mod filter;
mod health;
mod model;
mod scheduler;
mod service;
mod store;

#[cfg(test)]
pub(crate) mod testing;

use serde::Deserialize;
use serde_with::serde_as;
use std::time::Duration;

pub use client::{ActionClient, ActionError, FetchError, RelayOptions, SourceClient};
pub use model::*;
pub use service::MonitorService;
pub use store::{Store, StoreError, StoreResult};

pub(crate) use scheduler::Scheduler;

#[serde_as]
#[derive(Deserialize)]
pub(crate) struct Config {
    /// Period of the global driver tick. Individual channels may check
    /// less often via their own interval, never more often.
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "tick_interval_secs", default = "default_tick_interval")]
    pub(crate) tick_interval: Duration,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(60)
}
