//! Inactivity detection
//!
//! Two mechanisms report idleness: a coarse tick counted once a minute, and a
//! timestamp comparison run inside every interaction handler (which catches
//! backgrounded tabs whose timers were throttled). Both go through one
//! monitor whose latch reports an expiry once per session.

use chrono::{DateTime, Duration, Utc};

/// Granularity of the coarse idle tick
pub const IDLE_TICK_SECONDS: u64 = 60;

/// Outcome of an idle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// Still within the idle threshold
    Active,
    /// Threshold exceeded; the caller must close the session
    Expired { last_active_at: DateTime<Utc> },
    /// Threshold exceeded, but an expiry was already reported
    Latched,
}

/// Which mechanism triggered a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleSource {
    Tick,
    Interaction,
}

#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    idle_minutes: u32,
    last_active_at: DateTime<Utc>,
    idle_ticks: u32,
    latched: bool,
}

impl InactivityMonitor {
    pub fn new(idle_minutes: u32, now: DateTime<Utc>) -> Self {
        Self {
            idle_minutes: idle_minutes.max(1),
            last_active_at: now,
            idle_ticks: 0,
            latched: false,
        }
    }

    pub fn threshold(&self) -> Duration {
        Duration::minutes(i64::from(self.idle_minutes))
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Register a qualifying interaction
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.idle_ticks = 0;
    }

    /// Take the last-active instant from persisted state (stale reload)
    pub fn backdate_to(&mut self, instant: DateTime<Utc>) {
        self.last_active_at = instant;
    }

    /// Coarse tick: one call per elapsed minute
    pub fn tick(&mut self) -> IdleVerdict {
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks >= self.idle_minutes {
            self.expire()
        } else {
            IdleVerdict::Active
        }
    }

    /// Fine-grained check against the wall clock
    pub fn check(&mut self, now: DateTime<Utc>) -> IdleVerdict {
        if now - self.last_active_at > self.threshold() {
            self.expire()
        } else {
            IdleVerdict::Active
        }
    }

    /// Force an expiry report (used when persisted state is already stale)
    pub fn force_expire(&mut self) -> IdleVerdict {
        self.expire()
    }

    /// Clear the latch for a new session
    pub fn rearm(&mut self, now: DateTime<Utc>) {
        self.latched = false;
        self.record_activity(now);
    }

    fn expire(&mut self) -> IdleVerdict {
        if self.latched {
            IdleVerdict::Latched
        } else {
            self.latched = true;
            IdleVerdict::Expired {
                last_active_at: self.last_active_at,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_tick_expires_at_threshold() {
        let mut monitor = InactivityMonitor::new(3, start());
        assert_eq!(monitor.tick(), IdleVerdict::Active);
        assert_eq!(monitor.tick(), IdleVerdict::Active);
        assert_eq!(
            monitor.tick(),
            IdleVerdict::Expired {
                last_active_at: start()
            }
        );
        assert_eq!(monitor.tick(), IdleVerdict::Latched);
    }

    #[test]
    fn test_activity_resets_ticks() {
        let mut monitor = InactivityMonitor::new(2, start());
        monitor.tick();
        monitor.record_activity(start() + Duration::seconds(90));
        assert_eq!(monitor.idle_ticks(), 0);
        assert_eq!(monitor.tick(), IdleVerdict::Active);
    }

    #[test]
    fn test_check_uses_strict_gap() {
        let mut monitor = InactivityMonitor::new(10, start());
        assert_eq!(
            monitor.check(start() + Duration::minutes(10)),
            IdleVerdict::Active
        );
        assert!(matches!(
            monitor.check(start() + Duration::minutes(10) + Duration::seconds(1)),
            IdleVerdict::Expired { .. }
        ));
    }

    #[test]
    fn test_tick_and_check_share_latch() {
        let mut monitor = InactivityMonitor::new(1, start());
        assert!(matches!(monitor.tick(), IdleVerdict::Expired { .. }));
        assert_eq!(
            monitor.check(start() + Duration::minutes(30)),
            IdleVerdict::Latched
        );

        monitor.rearm(start() + Duration::minutes(30));
        assert!(!monitor.is_latched());
        assert_eq!(
            monitor.check(start() + Duration::minutes(31)),
            IdleVerdict::Active
        );
    }

    #[test]
    fn test_backdate() {
        let mut monitor = InactivityMonitor::new(5, start() + Duration::hours(1));
        monitor.backdate_to(start());
        assert_eq!(
            monitor.force_expire(),
            IdleVerdict::Expired {
                last_active_at: start()
            }
        );
    }
}
