//! Sliding-window request governor.
//!
//! Every caller owns a ledger of completed-call timestamps plus a count of
//! in-flight reservations. Admission is decided against two trailing windows
//! (1 hour, 24 hours). Entries older than 24 hours are pruned whenever the
//! caller's ledger is touched, and `sweep` drops ledgers that went idle.
//!
//! Ledgers live in a `DashMap`: the read-prune-compare-append sequence runs
//! while holding that caller's shard lock, so two requests from one caller
//! cannot both take the last slot, and callers on other shards never wait.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rate_limit::clock::{Clock, SystemClock};

const HOUR_SECS: i64 = 60 * 60;
const DAY_SECS: i64 = 24 * HOUR_SECS;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Which trailing window rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWindow {
    Hour,
    Day,
}

impl QuotaWindow {
    fn span(self) -> Duration {
        match self {
            QuotaWindow::Hour => Duration::seconds(HOUR_SECS),
            QuotaWindow::Day => Duration::seconds(DAY_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_per_hour: 5,
            max_per_day: 20,
        }
    }
}

/// Usage counts for display. On admission the counts are a projection that
/// includes the request being admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatus {
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub daily_used: u32,
    pub daily_limit: u32,
}

impl UsageStatus {
    pub fn summary(&self) -> String {
        format!(
            "Usage: {}/{} this hour, {}/{} today",
            self.hourly_used, self.hourly_limit, self.daily_used, self.daily_limit
        )
    }
}

/// A denied admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRejection {
    pub window: QuotaWindow,
    pub limit: u32,
    /// Time until the oldest counted entry leaves the window. `None` when the
    /// window is full of in-flight reservations only.
    pub retry_after: Option<Duration>,
    pub status: UsageStatus,
}

impl QuotaRejection {
    pub fn message(&self) -> String {
        let (label, unit) = match self.window {
            QuotaWindow::Hour => ("Hourly", "hour"),
            QuotaWindow::Day => ("Daily", "day"),
        };
        let wait = match self.retry_after {
            Some(d) => format!("Try again in {}.", humanize(d)),
            None => "Try again shortly.".to_string(),
        };
        format!("{label} limit ({}/{unit}) reached. {wait}", self.limit)
    }
}

/// Outcome of `RateGovernor::admit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub status: UsageStatus,
    pub rejection: Option<QuotaRejection>,
}

// ────────────────────────────────────────────────────────────────────────────
// Per-caller ledger
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CallerLedger {
    /// Completed calls, insertion ordered.
    entries: VecDeque<DateTime<Utc>>,
    /// Admitted requests whose outcome is not known yet.
    in_flight: u32,
}

impl CallerLedger {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - QuotaWindow::Day.span();
        self.entries.retain(|t| *t > cutoff);
    }

    fn counted_since(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &DateTime<Utc>> {
        self.entries.iter().filter(move |t| **t > cutoff)
    }

    fn counts(&self, now: DateTime<Utc>) -> (u32, u32) {
        let hourly = self.counted_since(now - QuotaWindow::Hour.span()).count() as u32;
        let daily = self.counted_since(now - QuotaWindow::Day.span()).count() as u32;
        (hourly + self.in_flight, daily + self.in_flight)
    }

    fn retry_after(&self, window: QuotaWindow, now: DateTime<Utc>) -> Option<Duration> {
        self.counted_since(now - window.span())
            .min()
            .map(|oldest| *oldest + window.span() - now)
    }

    fn evaluate(&self, now: DateTime<Utc>, limits: &QuotaLimits) -> Admission {
        let (hourly, daily) = self.counts(now);
        let current = UsageStatus {
            hourly_used: hourly,
            hourly_limit: limits.max_per_hour,
            daily_used: daily,
            daily_limit: limits.max_per_day,
        };

        let denied = if hourly >= limits.max_per_hour {
            Some((QuotaWindow::Hour, limits.max_per_hour))
        } else if daily >= limits.max_per_day {
            Some((QuotaWindow::Day, limits.max_per_day))
        } else {
            None
        };

        match denied {
            Some((window, limit)) => Admission {
                allowed: false,
                status: current,
                rejection: Some(QuotaRejection {
                    window,
                    limit,
                    retry_after: self.retry_after(window, now),
                    status: current,
                }),
            },
            None => Admission {
                allowed: true,
                status: UsageStatus {
                    hourly_used: hourly + 1,
                    daily_used: daily + 1,
                    ..current
                },
                rejection: None,
            },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Governor
// ────────────────────────────────────────────────────────────────────────────

/// Process-local request governor. Cheap to clone; clones share the ledger.
///
/// State is lost on restart. A new instance always starts with empty ledgers.
#[derive(Clone)]
pub struct RateGovernor {
    ledgers: Arc<DashMap<String, CallerLedger>>,
    limits: QuotaLimits,
    clock: Arc<dyn Clock>,
}

impl RateGovernor {
    pub fn new(limits: QuotaLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: QuotaLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledgers: Arc::new(DashMap::new()),
            limits,
            clock,
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Decides whether `caller` may start a request now. Never records usage.
    pub fn admit(&self, caller: &str) -> Admission {
        let now = self.clock.now();
        let mut ledger = self.ledgers.entry(caller.to_owned()).or_default();
        ledger.prune(now);
        ledger.evaluate(now, &self.limits)
    }

    /// Appends one completed call for `caller` at the current time.
    pub fn record(&self, caller: &str) {
        let now = self.clock.now();
        let mut ledger = self.ledgers.entry(caller.to_owned()).or_default();
        ledger.prune(now);
        ledger.entries.push_back(now);
    }

    /// Admits `caller` and holds a slot until the returned reservation is
    /// committed or dropped. Check and hold happen under one lock.
    pub fn reserve(&self, caller: &str) -> Result<Reservation, QuotaRejection> {
        let now = self.clock.now();
        let mut ledger = self.ledgers.entry(caller.to_owned()).or_default();
        ledger.prune(now);
        let admission = ledger.evaluate(now, &self.limits);
        if let Some(rejection) = admission.rejection {
            return Err(rejection);
        }
        ledger.in_flight += 1;
        Ok(Reservation {
            governor: self.clone(),
            caller: caller.to_owned(),
            status: admission.status,
            settled: false,
        })
    }

    /// Current counts for `caller` without creating or changing its ledger.
    pub fn status(&self, caller: &str) -> UsageStatus {
        let (hourly, daily) = self
            .ledgers
            .get(caller)
            .map(|ledger| ledger.counts(self.clock.now()))
            .unwrap_or((0, 0));
        UsageStatus {
            hourly_used: hourly,
            hourly_limit: self.limits.max_per_hour,
            daily_used: daily,
            daily_limit: self.limits.max_per_day,
        }
    }

    /// Prunes every ledger and drops the ones left empty. Returns how many
    /// callers were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.ledgers.len();
        self.ledgers.retain(|_, ledger| {
            ledger.prune(now);
            !ledger.entries.is_empty() || ledger.in_flight > 0
        });
        let dropped = before.saturating_sub(self.ledgers.len());
        debug!(dropped, remaining = self.ledgers.len(), "Usage ledger sweep");
        dropped
    }

    fn settle(&self, caller: &str, completed: bool) {
        let now = self.clock.now();
        let mut ledger = self.ledgers.entry(caller.to_owned()).or_default();
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
        if completed {
            ledger.entries.push_back(now);
        }
    }
}

/// A held admission slot. `commit` charges the caller; dropping releases the
/// slot without charging.
#[must_use = "dropping a reservation releases the slot without recording usage"]
pub struct Reservation {
    governor: RateGovernor,
    caller: String,
    status: UsageStatus,
    settled: bool,
}

impl Reservation {
    /// Projected usage including this request.
    pub fn status(&self) -> UsageStatus {
        self.status
    }

    pub fn commit(mut self) {
        self.settled = true;
        self.governor.settle(&self.caller, true);
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("caller", &self.caller)
            .field("status", &self.status)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.governor.settle(&self.caller, false);
        }
    }
}

fn humanize(d: Duration) -> String {
    let minutes = (d.num_seconds().max(0) + 59) / 60;
    match minutes {
        0 | 1 => "1 minute".to_string(),
        m if m < 120 => format!("{m} minutes"),
        m => format!("{} hours", (m + 59) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;

    fn governor(limits: QuotaLimits) -> (RateGovernor, ManualClock) {
        let clock = ManualClock::fixed();
        (
            RateGovernor::with_clock(limits, Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_fresh_caller_is_admitted_with_projection() {
        let (gov, _) = governor(QuotaLimits::default());
        let admission = gov.admit("10.0.0.1");
        assert!(admission.allowed);
        assert_eq!(admission.status.hourly_used, 1);
        assert_eq!(admission.status.daily_used, 1);
        assert_eq!(
            admission.status.summary(),
            "Usage: 1/5 this hour, 1/20 today"
        );
    }

    #[test]
    fn test_admit_never_records() {
        let (gov, _) = governor(QuotaLimits::default());
        for _ in 0..10 {
            assert!(gov.admit("a").allowed);
        }
        assert_eq!(gov.status("a").daily_used, 0);
    }

    #[test]
    fn test_hourly_window_slides() {
        let (gov, clock) = governor(QuotaLimits::default());
        for _ in 0..5 {
            gov.record("a");
            clock.advance(Duration::minutes(1));
        }

        let denied = gov.admit("a");
        assert!(!denied.allowed);
        let rejection = denied.rejection.unwrap();
        assert_eq!(rejection.window, QuotaWindow::Hour);
        assert_eq!(denied.status.hourly_used, 5);

        // First record is at t0; now is t0+5m. One second past t0+60m it leaves.
        clock.advance(Duration::minutes(55) + Duration::seconds(1));
        let allowed = gov.admit("a");
        assert!(allowed.allowed);
        assert_eq!(allowed.status.hourly_used, 5);
        assert_eq!(allowed.status.daily_used, 6);
    }

    #[test]
    fn test_entry_exactly_one_hour_old_is_outside_window() {
        let (gov, clock) = governor(QuotaLimits {
            max_per_hour: 1,
            max_per_day: 20,
        });
        gov.record("a");
        clock.advance(Duration::hours(1));
        assert!(gov.admit("a").allowed);
    }

    #[test]
    fn test_rejection_has_no_side_effect() {
        let (gov, _) = governor(QuotaLimits::default());
        for _ in 0..5 {
            gov.record("a");
        }
        for _ in 0..3 {
            assert!(!gov.admit("a").allowed);
        }
        assert_eq!(gov.status("a").daily_used, 5);
    }

    #[test]
    fn test_daily_limit_independent_of_hourly_resets() {
        let (gov, clock) = governor(QuotaLimits::default());
        for _ in 0..4 {
            for _ in 0..5 {
                gov.record("a");
            }
            clock.advance(Duration::minutes(61));
        }

        let admission = gov.admit("a");
        assert!(!admission.allowed);
        assert_eq!(admission.rejection.unwrap().window, QuotaWindow::Day);

        // The first batch was recorded 244 minutes ago; it expires at 24h.
        clock.advance(Duration::hours(24) - Duration::minutes(244) + Duration::seconds(1));
        assert!(gov.admit("a").allowed);
    }

    #[test]
    fn test_trailing_windows_never_exceed_limits() {
        let limits = QuotaLimits::default();
        let (gov, clock) = governor(limits);
        let mut recorded: Vec<DateTime<Utc>> = Vec::new();

        // Two simulated days of a caller retrying every 7 minutes.
        for _ in 0..(2 * 24 * 60 / 7) {
            if gov.admit("a").allowed {
                gov.record("a");
                recorded.push(clock.now());
            }
            let now = clock.now();
            let in_hour = recorded
                .iter()
                .filter(|t| **t > now - Duration::hours(1))
                .count() as u32;
            let in_day = recorded
                .iter()
                .filter(|t| **t > now - Duration::hours(24))
                .count() as u32;
            assert!(in_hour <= limits.max_per_hour);
            assert!(in_day <= limits.max_per_day);
            clock.advance(Duration::minutes(7));
        }
        assert!(recorded.len() >= limits.max_per_day as usize);
    }

    #[test]
    fn test_retry_after_points_at_oldest_entry() {
        let (gov, clock) = governor(QuotaLimits::default());
        for _ in 0..5 {
            gov.record("a");
        }
        clock.advance(Duration::minutes(18));

        let rejection = gov.admit("a").rejection.unwrap();
        assert_eq!(rejection.retry_after, Some(Duration::minutes(42)));
        assert_eq!(
            rejection.message(),
            "Hourly limit (5/hour) reached. Try again in 42 minutes."
        );
    }

    #[test]
    fn test_daily_rejection_message() {
        let (gov, _) = governor(QuotaLimits {
            max_per_hour: 50,
            max_per_day: 2,
        });
        gov.record("a");
        gov.record("a");
        let rejection = gov.admit("a").rejection.unwrap();
        assert_eq!(
            rejection.message(),
            "Daily limit (2/day) reached. Try again in 24 hours."
        );
    }

    #[test]
    fn test_callers_are_isolated() {
        let (gov, _) = governor(QuotaLimits::default());
        for _ in 0..5 {
            gov.record("a");
        }
        assert!(!gov.admit("a").allowed);
        assert!(gov.admit("b").allowed);
    }

    #[test]
    fn test_reservation_holds_slot_until_settled() {
        let (gov, _) = governor(QuotaLimits {
            max_per_hour: 1,
            max_per_day: 20,
        });

        let first = gov.reserve("a").expect("slot available");
        let second = gov.reserve("a").unwrap_err();
        assert_eq!(second.window, QuotaWindow::Hour);
        assert_eq!(second.retry_after, None);
        assert_eq!(second.message(), "Hourly limit (1/hour) reached. Try again shortly.");

        drop(first);
        assert_eq!(gov.status("a").hourly_used, 0);

        let third = gov.reserve("a").expect("released slot is reusable");
        third.commit();
        assert_eq!(gov.status("a").hourly_used, 1);
        assert!(gov.reserve("a").is_err());
    }

    #[test]
    fn test_reservation_debug_names_caller() {
        let (gov, _) = governor(QuotaLimits::default());
        let held = gov.reserve("caller-7").expect("slot available");
        let shown = format!("{held:?}");
        assert!(shown.contains("caller-7"), "got {shown}");
        assert!(shown.contains("settled: false"), "got {shown}");
    }

    #[test]
    fn test_concurrent_reservations_never_over_admit() {
        let limits = QuotaLimits {
            max_per_hour: 5,
            max_per_day: 20,
        };
        let (gov, _) = governor(limits);
        let callers = ["a", "b", "c", "d"];

        let admitted: Vec<(usize, u32)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let gov = gov.clone();
                    let caller = callers[i % callers.len()];
                    scope.spawn(move || {
                        let mut won = 0u32;
                        for _ in 0..10 {
                            if let Ok(reservation) = gov.reserve(caller) {
                                reservation.commit();
                                won += 1;
                            }
                        }
                        (i % callers.len(), won)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (idx, caller) in callers.iter().enumerate() {
            let total: u32 = admitted
                .iter()
                .filter(|(c, _)| *c == idx)
                .map(|(_, won)| won)
                .sum();
            assert_eq!(total, limits.max_per_hour, "caller {caller}");
            assert_eq!(gov.status(caller).hourly_used, limits.max_per_hour);
        }
    }

    #[test]
    fn test_sweep_drops_idle_callers() {
        let (gov, clock) = governor(QuotaLimits::default());
        gov.record("old");
        clock.advance(Duration::hours(23));
        gov.record("recent");
        clock.advance(Duration::hours(2));

        assert_eq!(gov.sweep(), 1);
        assert_eq!(gov.status("old").daily_used, 0);
        assert_eq!(gov.status("recent").daily_used, 1);
    }

    #[test]
    fn test_new_instance_starts_empty() {
        let (gov, clock) = governor(QuotaLimits::default());
        for _ in 0..5 {
            gov.record("a");
        }
        let restarted = RateGovernor::with_clock(QuotaLimits::default(), Arc::new(clock));
        assert!(restarted.admit("a").allowed);
        assert_eq!(restarted.status("a").daily_used, 0);
    }

    #[test]
    fn test_usage_status_serializes_snake_case() {
        let status = UsageStatus {
            hourly_used: 2,
            hourly_limit: 5,
            daily_used: 3,
            daily_limit: 20,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["hourly_used"], 2);
        assert_eq!(json["daily_limit"], 20);
        assert_eq!(serde_json::to_value(QuotaWindow::Hour).unwrap(), "hour");
    }
}
