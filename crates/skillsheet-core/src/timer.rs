//! Elapsed-active-time accounting.
//!
//! Time is the sum of wall-clock deltas between start/resume and the next
//! pause/complete, measured on the monotonic clock (`Instant`). Paused
//! intervals are excluded entirely. Wall-clock timestamps for audit display
//! live in the session's pause log, not here, so system-time adjustments
//! cannot corrupt elapsed-time accounting.

use std::time::{Duration, Instant};

/// Tracks accumulated active time for one session.
///
/// Public methods read the monotonic clock; the `_at` variants take an
/// explicit instant so tests can drive time deterministically.
#[derive(Debug, Clone, Default)]
pub struct SessionTimer {
    accrued: Duration,
    running_since: Option<Instant>,
    time_limit: Option<Duration>,
}

impl SessionTimer {
    pub fn new(time_limit: Option<Duration>) -> Self {
        Self {
            accrued: Duration::ZERO,
            running_since: None,
            time_limit,
        }
    }

    /// Begin (or resume) accrual. No-op if already running.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Stop accrual, folding the open interval into the accumulated total.
    /// No-op if not running.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accrued += now.saturating_duration_since(since);
        }
    }

    /// Total active time: accumulated intervals plus the open one, if any.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.accrued + now.saturating_duration_since(since),
            None => self.accrued,
        }
    }

    /// Time left before the limit, or `None` when no limit is configured.
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Instant::now())
    }

    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.time_limit
            .map(|limit| limit.saturating_sub(self.elapsed_at(now)))
    }

    /// True once elapsed active time meets or exceeds the configured limit.
    /// Always false without a limit. Expiry never finalizes a session by
    /// itself; the state machine reacts to it.
    pub fn expired(&self) -> bool {
        self.expired_at(Instant::now())
    }

    pub fn expired_at(&self, now: Instant) -> bool {
        match self.time_limit {
            Some(limit) => self.elapsed_at(now) >= limit,
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    /// Overwrite the accumulated total. Used when rebuilding a session from
    /// its operation log, where timer-affecting operations carry the elapsed
    /// value recorded at emission.
    pub fn set_accrued(&mut self, accrued: Duration) {
        self.accrued = accrued;
    }

    /// Fold an externally reconstructed interval into the total without
    /// touching the running state. Used when a replayed log ends with the
    /// timer running and the open interval is known only from wall-clock
    /// operation timestamps.
    pub fn add_accrued(&mut self, extra: Duration) {
        self.accrued += extra;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn paused_intervals_are_excluded() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(None);

        timer.start_at(t0);
        timer.pause_at(t0 + secs(100));
        // 120s paused
        timer.start_at(t0 + secs(220));
        timer.pause_at(t0 + secs(300));

        assert_eq!(timer.elapsed_at(t0 + secs(300)), secs(180));
        // Frozen while paused
        assert_eq!(timer.elapsed_at(t0 + secs(500)), secs(180));
    }

    #[test]
    fn elapsed_is_monotonic_while_running() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(None);
        timer.start_at(t0);

        let mut last = Duration::ZERO;
        for s in [1u64, 5, 30, 31, 600] {
            let e = timer.elapsed_at(t0 + secs(s));
            assert!(e >= last, "elapsed went backwards at {s}s");
            last = e;
        }
    }

    #[test]
    fn expiry_against_time_limit() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(Some(secs(600)));
        timer.start_at(t0);

        assert!(!timer.expired_at(t0 + secs(599)));
        assert!(timer.expired_at(t0 + secs(600)));
        assert!(timer.expired_at(t0 + secs(650)));
        assert_eq!(timer.remaining_at(t0 + secs(450)), Some(secs(150)));
        assert_eq!(timer.remaining_at(t0 + secs(700)), Some(Duration::ZERO));
    }

    #[test]
    fn no_limit_never_expires() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(None);
        timer.start_at(t0);
        assert!(!timer.expired_at(t0 + secs(100_000)));
        assert_eq!(timer.remaining_at(t0 + secs(10)), None);
    }

    #[test]
    fn double_start_and_double_pause_are_noops() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(None);
        timer.start_at(t0);
        timer.start_at(t0 + secs(50));
        timer.pause_at(t0 + secs(100));
        timer.pause_at(t0 + secs(200));
        assert_eq!(timer.elapsed_at(t0 + secs(200)), secs(100));
    }

    #[test]
    fn set_accrued_restores_replayed_elapsed() {
        let mut timer = SessionTimer::new(Some(secs(600)));
        timer.set_accrued(secs(240));
        assert_eq!(timer.elapsed(), secs(240));
        assert!(!timer.is_running());
    }

    #[test]
    fn add_accrued_credits_without_stopping() {
        let t0 = Instant::now();
        let mut timer = SessionTimer::new(None);
        timer.set_accrued(secs(100));
        timer.start_at(t0);
        timer.add_accrued(secs(30));
        assert!(timer.is_running());
        assert_eq!(timer.elapsed_at(t0 + secs(10)), secs(140));
    }
}
