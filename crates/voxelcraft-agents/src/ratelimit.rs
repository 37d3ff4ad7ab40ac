//! Per-agent fixed-window rate limits.
//!
//! Each action kind (`SAY`, `MARKET_SAY`, `WHISPER`, `OFFER_TRADE`,
//! `POST_BOARD`) keeps its own window. Window sizes come from world
//! configuration; only the window start and count are stored per agent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A configured limit: at most `max` actions per `window_ticks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Window length in ticks.
    pub window_ticks: u64,
    /// Actions allowed per window.
    pub max: u32,
}

impl RateLimitSpec {
    /// Build a spec.
    pub const fn new(max: u32, window_ticks: u64) -> Self {
        Self { window_ticks, max }
    }

    /// A zero window or zero max means "no limit".
    pub const fn is_unlimited(self) -> bool {
        self.window_ticks == 0 || self.max == 0
    }
}

/// Stored state of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateWindow {
    /// Tick the window opened.
    pub start_tick: u64,
    /// Actions counted in the window.
    pub count: u32,
}

/// Windows keyed by action kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimiter {
    windows: BTreeMap<String, RateWindow>,
}

impl RateLimiter {
    /// Count one `kind` action at `now`.
    ///
    /// Returns `Err(cooldown_ticks)` when the window is full.
    pub fn allow(&mut self, kind: &str, now: u64, spec: RateLimitSpec) -> Result<(), u64> {
        if spec.is_unlimited() {
            return Ok(());
        }
        let w = self
            .windows
            .entry(kind.to_owned())
            .or_insert(RateWindow { start_tick: now, count: 0 });
        if now.saturating_sub(w.start_tick) >= spec.window_ticks || now < w.start_tick {
            w.start_tick = now;
            w.count = 0;
        }
        if w.count >= spec.max {
            let until = w.start_tick.saturating_add(spec.window_ticks);
            return Err(until.saturating_sub(now).max(1));
        }
        w.count = w.count.saturating_add(1);
        Ok(())
    }

    /// Non-empty windows for snapshot export.
    pub fn windows(&self) -> impl Iterator<Item = (&String, &RateWindow)> {
        self.windows.iter().filter(|(k, w)| !k.is_empty() && w.count > 0)
    }

    /// Restore windows from a snapshot.
    pub fn load(windows: BTreeMap<String, RateWindow>) -> Self {
        Self {
            windows: windows
                .into_iter()
                .filter(|(k, w)| !k.is_empty() && w.count > 0)
                .collect(),
        }
    }

    /// Forget every window.
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_then_reopens() {
        let mut rl = RateLimiter::default();
        let spec = RateLimitSpec::new(2, 50);
        assert_eq!(rl.allow("SAY", 10, spec), Ok(()));
        assert_eq!(rl.allow("SAY", 11, spec), Ok(()));
        assert_eq!(rl.allow("SAY", 12, spec), Err(48));
        assert_eq!(rl.allow("SAY", 60, spec), Ok(()));
    }

    #[test]
    fn kinds_are_independent() {
        let mut rl = RateLimiter::default();
        let spec = RateLimitSpec::new(1, 600);
        assert!(rl.allow("POST_BOARD", 0, spec).is_ok());
        assert!(rl.allow("POST_BOARD", 1, spec).is_err());
        assert!(rl.allow("SAY", 1, spec).is_ok());
    }

    #[test]
    fn zero_windows_allow() {
        let mut rl = RateLimiter::default();
        for t in 0..100 {
            assert!(rl.allow("SAY", t, RateLimitSpec::new(0, 50)).is_ok());
            assert!(rl.allow("SAY", t, RateLimitSpec::new(3, 0)).is_ok());
        }
        assert_eq!(rl.windows().count(), 0);
    }
}
