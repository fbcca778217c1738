//! Session-wide interval gate for outgoing probes

use crate::oracle::retry::Clock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest interval the gate will slow down to
const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Interval used after a 429 when no rate limit was configured
const THROTTLE_FLOOR: Duration = Duration::from_millis(100);

/// Serializable rate-limit state, persisted with the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Current spacing between probes, in milliseconds
    pub interval_ms: u64,
    /// Number of times the target answered 429
    pub throttle_events: u32,
}

#[derive(Debug)]
struct GateState {
    interval: Duration,
    next_slot: Duration,
    throttle_events: u32,
}

/// Spaces probes at least `interval` apart across every task of a session
#[derive(Clone)]
pub struct RateGate {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<GateState>>,
}

impl RateGate {
    /// `rps` of `None` or zero leaves the gate open until the target throttles
    pub fn new(rps: Option<u32>, clock: Arc<dyn Clock>) -> Self {
        let interval = match rps {
            Some(rps) if rps > 0 => Duration::from_millis(1000 / u64::from(rps)),
            _ => Duration::ZERO,
        };
        Self {
            clock,
            state: Arc::new(Mutex::new(GateState {
                interval,
                next_slot: Duration::ZERO,
                throttle_events: 0,
            })),
        }
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().map(|s| s.interval).unwrap_or_default()
    }

    /// Waits for this caller's slot. Slots are handed out in call order.
    pub async fn acquire(&self) {
        let wait = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let now = self.clock.now();
            let slot = state.next_slot.max(now);
            state.next_slot = slot + state.interval;
            slot - now
        };
        if !wait.is_zero() {
            debug!("Rate gate: waiting {wait:?}");
            self.clock.sleep(wait).await;
        }
    }

    /// Target answered 429: double the spacing
    pub fn throttled(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let doubled = (state.interval * 2).max(THROTTLE_FLOOR).min(MAX_INTERVAL);
        state.throttle_events += 1;
        if doubled != state.interval {
            warn!("Target is throttling, slowing probes to one every {doubled:?}");
            state.interval = doubled;
        }
        let now = self.clock.now();
        state.next_slot = state.next_slot.max(now + doubled);
    }

    pub fn snapshot(&self) -> RateLimitState {
        self.state
            .lock()
            .map(|s| RateLimitState {
                interval_ms: s.interval.as_millis() as u64,
                throttle_events: s.throttle_events,
            })
            .unwrap_or_default()
    }

    /// Adopts persisted state; never speeds up past the configured interval
    pub fn restore(&self, saved: RateLimitState) {
        if let Ok(mut state) = self.state.lock() {
            let saved_interval = Duration::from_millis(saved.interval_ms).min(MAX_INTERVAL);
            state.interval = state.interval.max(saved_interval);
            state.throttle_events = saved.throttle_events;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::retry::FakeClock;

    #[tokio::test]
    async fn test_gate_spaces_consecutive_probes() {
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::new(Some(10), clock.clone());

        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(100)]
        );
    }

    #[tokio::test]
    async fn test_open_gate_never_sleeps() {
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::new(None, clock.clone());
        for _ in 0..5 {
            gate.acquire().await;
        }
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_throttle_doubles_interval_up_to_cap() {
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::new(Some(4), clock);
        assert_eq!(gate.interval(), Duration::from_millis(250));

        gate.throttled();
        assert_eq!(gate.interval(), Duration::from_millis(500));

        for _ in 0..10 {
            gate.throttled();
        }
        assert_eq!(gate.interval(), MAX_INTERVAL);
        assert_eq!(gate.snapshot().throttle_events, 11);
    }

    #[test]
    fn test_restore_keeps_slower_interval() {
        let gate = RateGate::new(Some(10), Arc::new(FakeClock::new()));
        gate.restore(RateLimitState {
            interval_ms: 400,
            throttle_events: 2,
        });
        assert_eq!(gate.interval(), Duration::from_millis(400));

        gate.restore(RateLimitState {
            interval_ms: 10,
            throttle_events: 0,
        });
        assert_eq!(gate.interval(), Duration::from_millis(400));
    }
}
