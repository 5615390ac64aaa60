//! Standalone traffic light module
//!
//! The blocking message queue and the traffic light built on top of it.
//! Surrounding simulations drive the light through `simulate`,
//! `wait_for_green` and `current_phase`.

mod config;
mod message_queue;
mod stats;
mod traffic_light;
mod types;

// Re-export public types for external use
pub use config::{CycleTiming, LightConfig};
pub use message_queue::{DrainOrder, MessageQueue, ReceiveError};
pub use stats::LightStats;
pub use traffic_light::{TrafficLight, CYCLE_THREAD_NAME};
pub use types::{
    AtomicPhase, Phase, DEFAULT_MAX_CYCLE_SECS, DEFAULT_MIN_CYCLE_SECS, DEFAULT_POLL_INTERVAL_MS,
};
