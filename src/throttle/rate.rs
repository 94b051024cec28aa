//! Process-wide pacing of yt-dlp invocations.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RateConfig {
    /// Minimum gap between two invocations, sampled per wait
    pub min_spacing: Duration,
    pub max_spacing: Duration,
    /// Pause after a bot-detection event, sampled per wait
    pub block_cooldown_min: Duration,
    pub block_cooldown_max: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_secs(3),
            max_spacing: Duration::from_secs(6),
            block_cooldown_min: Duration::from_secs(30),
            block_cooldown_max: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct RateState {
    last_fetch_time: Option<Instant>,
    last_block_detected_time: Option<Instant>,
}

/// Slot handed to one waiter
struct Reservation {
    delay: Duration,
    /// Block marker being waited out, if the slot falls in a cooldown
    cooldown: Option<Instant>,
}

pub struct RateController {
    config: RateConfig,
    state: Mutex<RateState>,
}

impl RateController {
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Sleep until the next invocation is allowed; returns the time slept.
    ///
    /// Each caller reserves its own slot, so concurrent waiters are spaced
    /// from one another. A pending block cooldown pushes the slot past the
    /// cooldown, and spacing still applies after it.
    pub async fn wait_before_next_attempt(&self) -> Duration {
        let Reservation { delay, cooldown } = self.reserve_slot();
        if delay.is_zero() {
            return delay;
        }

        match cooldown {
            Some(marker) => {
                warn!(
                    delay_secs = delay.as_secs(),
                    "Bot detection cooldown before next download"
                );
                tokio::time::sleep(delay).await;

                let mut state = self.state.lock();
                if state.last_block_detected_time == Some(marker) {
                    state.last_block_detected_time = None;
                }
                info!("Cooldown complete");
            }
            None => {
                debug!(delay_ms = delay.as_millis() as u64, "Rate limiting");
                tokio::time::sleep(delay).await;
            }
        }
        delay
    }

    /// Stamp an invocation; never moves a later reserved slot backwards.
    pub fn record_attempt(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_fetch_time = Some(state.last_fetch_time.map_or(now, |t| t.max(now)));
    }

    pub fn record_block_detected(&self) {
        warn!("Bot detection recorded, next download will wait");
        self.state.lock().last_block_detected_time = Some(Instant::now());
    }

    /// Whether a block cooldown marker is pending.
    pub fn cooling_down(&self) -> bool {
        self.state.lock().last_block_detected_time.is_some()
    }

    fn reserve_slot(&self) -> Reservation {
        let now = Instant::now();
        let mut state = self.state.lock();

        let mut slot = now;
        let mut cooldown = None;

        if let Some(marker) = state.last_block_detected_time {
            let elapsed = now.duration_since(marker);
            let sampled = sample(self.config.block_cooldown_min, self.config.block_cooldown_max);
            if elapsed < sampled {
                slot = marker + sampled;
                cooldown = Some(marker);
            } else if elapsed >= self.config.block_cooldown_max.max(self.config.block_cooldown_min) {
                state.last_block_detected_time = None;
            }
        }

        if let Some(last) = state.last_fetch_time {
            let spaced = last + sample(self.config.min_spacing, self.config.max_spacing);
            if spaced > slot {
                slot = spaced;
            }
        }

        state.last_fetch_time = Some(slot);
        Reservation {
            delay: slot.saturating_duration_since(now),
            cooldown,
        }
    }
}

/// Uniform duration in `[a, b]` at millisecond resolution
fn sample(a: Duration, b: Duration) -> Duration {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let (lo, hi) = (lo.as_millis() as u64, hi.as_millis() as u64);
    if lo == hi {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}
