//! Shared request limiter. One instance is handed to every worker so the
//! whole run stays under the backend quota.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Debug, Default)]
struct LimiterState {
    next_slot: Option<Instant>,
    paused_until: Option<Instant>,
}

impl RateLimiter {
    /// Spaces request starts `60 / requests_per_minute` seconds apart. 0 disables spacing.
    pub fn new(requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / requests_per_minute
        };
        Self {
            interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Waits for the next free request slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let mut slot = state.next_slot.map_or(now, |next| next.max(now));
            if let Some(paused) = state.paused_until {
                slot = slot.max(paused);
            }
            state.next_slot = Some(slot + self.interval);
            slot
        };
        if slot > Instant::now() {
            debug!(wait_ms = (slot - Instant::now()).as_millis() as u64, "Waiting for LLM rate limit slot");
        }
        sleep_until(slot).await;
    }

    /// Blocks every caller for `delay` after the backend signalled rate limiting.
    pub async fn pause_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.state.lock().await;
        state.paused_until = Some(state.paused_until.map_or(until, |p| p.max(until)));
    }
}
