use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct State {
    remaining: Option<u32>,
    cooldown_until: Option<Instant>,
}

/// Heuristic backoff driven by the provider's remaining-quota signal.
///
/// Once the reported quota drops to the low-water mark the limiter refuses
/// calls for a fixed wall-clock window. A later, higher quota reading does not
/// end the window early; only time does. Calls already in flight when the
/// window opens still complete.
#[derive(Debug)]
pub struct RateLimiter {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(State::default()),
        }
    }

    pub fn allowed(&self) -> bool {
        let state = self.state.lock();
        match state.cooldown_until {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Records the quota reported by the latest provider response.
    pub fn record_quota(&self, remaining: u32) {
        let mut state = self.state.lock();
        state.remaining = Some(remaining);
        if remaining <= self.threshold {
            warn!(
                "⏳ Cuota del proveedor baja ({} restantes), pausando llamadas {:?}",
                remaining, self.cooldown
            );
            Self::extend(&mut state, Instant::now() + self.cooldown);
        } else {
            debug!("Cuota del proveedor: {} restantes", remaining);
        }
    }

    /// Enters cooldown regardless of quota, e.g. after an HTTP 429.
    pub fn trip(&self) {
        let mut state = self.state.lock();
        warn!("🚫 Proveedor limitado, pausando llamadas {:?}", self.cooldown);
        Self::extend(&mut state, Instant::now() + self.cooldown);
    }

    pub fn remaining(&self) -> Option<u32> {
        self.state.lock().remaining
    }

    /// Time left in the current cooldown, if any.
    pub fn cooldown_left(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .cooldown_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    // Nunca acorta una ventana ya abierta
    fn extend(state: &mut State, until: Instant) {
        state.cooldown_until = Some(match state.cooldown_until {
            Some(current) if current > until => current,
            _ => until,
        });
    }
}
