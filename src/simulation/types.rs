//! Core types for the traffic light
//!
//! The light only knows two phases. The phase is also kept in an atomic cell
//! so it can be read without touching the notification queue.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The phase a traffic light is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Vehicles must stop
    #[default]
    Red,
    /// Vehicles may cross
    Green,
}

impl Phase {
    /// The phase the light switches to next
    pub fn toggled(self) -> Phase {
        match self {
            Phase::Red => Phase::Green,
            Phase::Green => Phase::Red,
        }
    }

    pub fn is_green(self) -> bool {
        self == Phase::Green
    }

    pub fn is_red(self) -> bool {
        self == Phase::Red
    }

    /// Phase of a light that started red and has flipped `flips` times
    pub fn from_flip_count(flips: u64) -> Phase {
        if flips % 2 == 0 {
            Phase::Red
        } else {
            Phase::Green
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Phase::Red => 0,
            Phase::Green => 1,
        }
    }

    fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::Red,
            _ => Phase::Green,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Red => write!(f, "red"),
            Phase::Green => write!(f, "green"),
        }
    }
}

/// Lock-free snapshot cell holding the most recently published phase
#[derive(Debug)]
pub struct AtomicPhase(AtomicU8);

impl AtomicPhase {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase.to_u8()))
    }

    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, phase: Phase) {
        self.0.store(phase.to_u8(), Ordering::Release);
    }
}

impl Default for AtomicPhase {
    fn default() -> Self {
        Self::new(Phase::default())
    }
}

/// Default lower bound of a randomized phase duration, in seconds
pub const DEFAULT_MIN_CYCLE_SECS: u64 = 4;

/// Default upper bound of a randomized phase duration, in seconds
pub const DEFAULT_MAX_CYCLE_SECS: u64 = 6;

/// Sleep between two iterations of the polling cycle loop
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;
