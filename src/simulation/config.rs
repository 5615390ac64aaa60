//! Configuration for a traffic light
//!
//! Defaults reproduce a light that holds each phase for 4 to 6 seconds.

use std::time::Duration;

use anyhow::{bail, Result};

use super::message_queue::DrainOrder;
use super::types::{DEFAULT_MAX_CYCLE_SECS, DEFAULT_MIN_CYCLE_SECS, DEFAULT_POLL_INTERVAL_MS};

/// How the cycle thread waits out a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleTiming {
    /// Sleep once for the exact drawn duration
    #[default]
    Exact,
    /// Wake every `poll_interval` and compare the elapsed time, truncated to
    /// whole multiples of `granularity`, against the drawn duration
    Polling {
        poll_interval: Duration,
        granularity: Duration,
    },
}

impl CycleTiming {
    /// 1ms polling with elapsed time counted in whole seconds
    pub fn polling_whole_seconds() -> Self {
        CycleTiming::Polling {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            granularity: Duration::from_secs(1),
        }
    }
}

/// Settings for a `TrafficLight`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightConfig {
    /// Shortest time a phase is held
    pub min_cycle: Duration,
    /// Longest time a phase is held
    pub max_cycle: Duration,
    pub timing: CycleTiming,
    /// Order in which a backlog of phase changes is delivered
    pub drain_order: DrainOrder,
    /// Fixed RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            min_cycle: Duration::from_secs(DEFAULT_MIN_CYCLE_SECS),
            max_cycle: Duration::from_secs(DEFAULT_MAX_CYCLE_SECS),
            timing: CycleTiming::Exact,
            drain_order: DrainOrder::Fifo,
            seed: None,
        }
    }
}

impl LightConfig {
    pub fn with_cycle_range(mut self, min_cycle: Duration, max_cycle: Duration) -> Self {
        self.min_cycle = min_cycle;
        self.max_cycle = max_cycle;
        self
    }

    pub fn with_timing(mut self, timing: CycleTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_drain_order(mut self, drain_order: DrainOrder) -> Self {
        self.drain_order = drain_order;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check that the settings describe a light that can actually cycle
    pub fn validate(&self) -> Result<()> {
        if self.min_cycle.is_zero() {
            bail!("minimum cycle duration must be greater than zero");
        }
        if self.min_cycle > self.max_cycle {
            bail!(
                "minimum cycle duration {:?} exceeds maximum {:?}",
                self.min_cycle,
                self.max_cycle
            );
        }
        if let CycleTiming::Polling {
            poll_interval,
            granularity,
        } = self.timing
        {
            if poll_interval.is_zero() {
                bail!("poll interval must be greater than zero");
            }
            if granularity.is_zero() {
                bail!("polling granularity must be greater than zero");
            }
        }
        Ok(())
    }
}
