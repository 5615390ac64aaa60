//! Traffic light state machine
//!
//! A background thread holds each phase for a random duration, then flips
//! red <-> green and publishes the new phase on a `MessageQueue`. Callers
//! block in `wait_for_green` or read the current phase without blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::{debug, error, info, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::{CycleTiming, LightConfig};
use super::message_queue::{MessageQueue, ReceiveError};
use super::stats::LightStats;
use super::types::{AtomicPhase, Phase};

/// Name of the thread that cycles through the phases
pub const CYCLE_THREAD_NAME: &str = "traffic-light-cycle";

/// State shared between the light's owner and its cycle thread
struct Shared {
    queue: MessageQueue<Phase>,
    phase: AtomicPhase,
    flips: AtomicU64,
    greens: AtomicU64,
    reds: AtomicU64,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl Shared {
    /// Sleep for `timeout` unless a stop is requested first.
    /// Returns false if the light is stopping.
    fn sleep_unless_stopped(&self, timeout: Duration) -> bool {
        let stopped = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .stop_signal
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        !*stopped
    }

    fn request_stop(&self) {
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.stop_signal.notify_all();
    }

    /// Wait out one phase. Returns false if the light is stopping.
    fn hold_phase(&self, cycle: Duration, timing: CycleTiming) -> bool {
        match timing {
            CycleTiming::Exact => self.sleep_unless_stopped(cycle),
            CycleTiming::Polling {
                poll_interval,
                granularity,
            } => {
                let last_flip = Instant::now();
                loop {
                    if truncate(last_flip.elapsed(), granularity) >= cycle {
                        return true;
                    }
                    if !self.sleep_unless_stopped(poll_interval) {
                        return false;
                    }
                }
            }
        }
    }

    /// Toggle the phase and publish it. The snapshot is written before the
    /// event is sent, so whoever receives the event also sees the new phase.
    fn flip(&self) -> Phase {
        let next = self.phase.load().toggled();
        self.phase.store(next);
        self.flips.fetch_add(1, Ordering::Relaxed);
        match next {
            Phase::Green => self.greens.fetch_add(1, Ordering::Relaxed),
            Phase::Red => self.reds.fetch_add(1, Ordering::Relaxed),
        };
        self.queue.send(next);
        next
    }
}

/// Round `elapsed` down to a whole number of `granularity` steps
fn truncate(elapsed: Duration, granularity: Duration) -> Duration {
    let step = granularity.as_nanos();
    let nanos = elapsed.as_nanos() / step * step;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn draw_cycle(rng: &mut StdRng, config: &LightConfig) -> Duration {
    rng.random_range(config.min_cycle..=config.max_cycle)
}

/// Body of the cycle thread. Runs until a stop is requested.
fn cycle_through_phases(shared: Arc<Shared>, config: LightConfig, mut rng: StdRng) {
    loop {
        let cycle = draw_cycle(&mut rng, &config);
        trace!("holding {} for {:?}", shared.phase.load(), cycle);
        if !shared.hold_phase(cycle, config.timing) {
            break;
        }
        let phase = shared.flip();
        debug!(
            "light turned {} after {:?} (flip #{})",
            phase,
            cycle,
            shared.flips.load(Ordering::Relaxed)
        );
    }
    debug!("cycle thread stopped");
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// A traffic light cycling between red and green
///
/// Share it between threads with `Arc<TrafficLight>`. Dropping the light
/// stops and joins its cycle thread.
pub struct TrafficLight {
    shared: Arc<Shared>,
    config: LightConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl TrafficLight {
    /// Create a red light with the default 4-6 second cycle
    pub fn new() -> Self {
        Self::build(LightConfig::default())
    }

    pub fn with_config(config: LightConfig) -> Result<Self> {
        config.validate().context("invalid traffic light configuration")?;
        Ok(Self::build(config))
    }

    fn build(config: LightConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: MessageQueue::with_order(config.drain_order),
                phase: AtomicPhase::new(Phase::Red),
                flips: AtomicU64::new(0),
                greens: AtomicU64::new(0),
                reds: AtomicU64::new(0),
                stop: Mutex::new(false),
                stop_signal: Condvar::new(),
            }),
            config,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &LightConfig {
        &self.config
    }

    /// Start cycling through the phases on a background thread
    ///
    /// Returns immediately. Fails if the light is already running or has
    /// been shut down.
    pub fn simulate(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Running(_) => bail!("traffic light is already running"),
            Lifecycle::Stopped => bail!("traffic light has been shut down"),
            Lifecycle::Idle => {}
        }

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(CYCLE_THREAD_NAME.to_string())
            .spawn(move || cycle_through_phases(shared, config, rng))
            .context("failed to spawn traffic light cycle thread")?;

        *lifecycle = Lifecycle::Running(handle);
        info!(
            "traffic light started, cycling every {:?} to {:?}",
            self.config.min_cycle, self.config.max_cycle
        );
        Ok(())
    }

    /// Block until the light is green
    ///
    /// Returns at once if the light is already green. Otherwise consumes
    /// phase changes until a green one arrives that is still current. Each
    /// green change releases a single waiter.
    pub fn wait_for_green(&self) -> Result<()> {
        self.wait_for_green_until(None).map(|_| ())
    }

    /// Like `wait_for_green`, but gives up after `timeout`
    ///
    /// Returns `Ok(false)` if the light did not turn green in time.
    pub fn wait_for_green_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_for_green_until(Some(Instant::now() + timeout))
    }

    fn wait_for_green_until(&self, deadline: Option<Instant>) -> Result<bool> {
        let queue = &self.shared.queue;
        if queue.is_closed() {
            bail!("traffic light has been shut down");
        }
        if self.current_phase().is_green() {
            let dropped = queue.discard_unclaimed();
            if dropped > 0 {
                trace!("discarded {} unclaimed phase events", dropped);
            }
            return Ok(true);
        }

        loop {
            let event = match deadline {
                None => queue.receive(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    match queue.receive_timeout(deadline - now) {
                        Ok(phase) => Some(phase),
                        Err(ReceiveError::Closed) => None,
                        Err(ReceiveError::Timeout) => return Ok(false),
                    }
                }
            };

            match event {
                None => bail!("traffic light was shut down before turning green"),
                Some(Phase::Green) if self.current_phase().is_green() => return Ok(true),
                Some(Phase::Green) => trace!("skipping stale green phase"),
                Some(Phase::Red) => {}
            }
        }
    }

    /// The most recently published phase. Never blocks.
    pub fn current_phase(&self) -> Phase {
        self.shared.phase.load()
    }

    /// Number of phase changes since the light was created
    pub fn flip_count(&self) -> u64 {
        self.shared.flips.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running(_))
    }

    pub fn stats(&self) -> LightStats {
        LightStats {
            flips: self.flip_count(),
            greens_published: self.shared.greens.load(Ordering::Relaxed),
            reds_published: self.shared.reds.load(Ordering::Relaxed),
            current_phase: self.current_phase(),
            pending_events: self.shared.queue.len(),
        }
    }

    /// Stop the cycle thread and release every blocked waiter
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        // The lifecycle lock is held until the queue is closed, so a
        // concurrent shutdown cannot close it while a flip is being sent.
        let mut lifecycle = self.lifecycle();
        self.shared.request_stop();

        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        if let Lifecycle::Running(handle) = previous {
            if handle.join().is_err() {
                error!("traffic light cycle thread panicked");
            }
            info!("traffic light stopped after {} flips", self.flip_count());
        }
        self.shared.queue.close();
    }
}

impl Default for TrafficLight {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TrafficLight {
    fn drop(&mut self) {
        self.shutdown();
    }
}
