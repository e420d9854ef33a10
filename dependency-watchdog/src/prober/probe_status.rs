//! The success/error counter state machine shared by the API-server probe
//! and the node-lease probe (spec §3 "ProbeStatus", §4.2). Generalized from
//! the teacher's `garbage_collector.rs` ticket/state-machine idiom: a small
//! struct mutated only through named transitions, with a back-off deadline
//! represented as a plain `Instant` rather than a timer task.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProbeStatus {
    success_count: u32,
    error_count: u32,
    last_err: Option<String>,
    back_off_until: Option<Instant>,
    success_threshold: u32,
    failure_threshold: u32,
}

impl ProbeStatus {
    pub fn new(success_threshold: u32, failure_threshold: u32) -> Self {
        ProbeStatus {
            success_count: 0,
            error_count: 0,
            last_err: None,
            back_off_until: None,
            success_threshold,
            failure_threshold,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.success_count >= self.success_threshold
    }

    pub fn is_unhealthy(&self) -> bool {
        self.error_count >= self.failure_threshold
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_err.as_deref()
    }

    /// True while `now` is still inside a previously recorded back-off
    /// window. The caller must not run the next probe attempt while true.
    pub fn in_backoff(&self, now: Instant) -> bool {
        self.back_off_until.is_some_and(|until| now < until)
    }

    /// A successful probe: increments (capped) `successCount`, zeroes
    /// `errorCount`, and clears any pending back-off.
    pub fn record_success(&mut self) {
        self.success_count = (self.success_count + 1).min(self.success_threshold);
        self.error_count = 0;
        self.last_err = None;
        self.back_off_until = None;
    }

    /// A non-ignorable failure: increments (capped) `errorCount`, zeroes
    /// `successCount`. Starts the failure back-off only once the threshold
    /// is actually reached (spec §4.2: the back-off begins on entering
    /// Unhealthy, not on every failed attempt).
    pub fn record_failure(&mut self, err: impl Into<String>, backoff: Duration, now: Instant) {
        self.error_count = (self.error_count + 1).min(self.failure_threshold);
        self.success_count = 0;
        self.last_err = Some(err.into());
        if self.is_unhealthy() {
            self.back_off_until = Some(now + backoff);
        }
    }

    /// A rate-limited (TooManyRequests) response: no counter movement, just
    /// a short local back-off (spec §4.2).
    pub fn record_rate_limited(&mut self, backoff: Duration, now: Instant) {
        self.back_off_until = Some(now + backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_unhealthy_exactly_at_threshold() {
        let mut status = ProbeStatus::new(1, 3);
        let now = Instant::now();
        status.record_failure("a", Duration::from_secs(1), now);
        assert!(!status.is_unhealthy());
        status.record_failure("b", Duration::from_secs(1), now);
        assert!(!status.is_unhealthy());
        status.record_failure("c", Duration::from_secs(1), now);
        assert!(status.is_unhealthy());
    }

    #[test]
    fn success_clears_error_state() {
        let mut status = ProbeStatus::new(1, 3);
        let now = Instant::now();
        status.record_failure("a", Duration::from_secs(1), now);
        status.record_failure("b", Duration::from_secs(1), now);
        status.record_success();
        assert!(!status.is_unhealthy());
        assert!(status.is_healthy());
        assert!(!status.in_backoff(now));
    }

    #[test]
    fn backoff_only_starts_once_unhealthy() {
        let mut status = ProbeStatus::new(1, 2);
        let now = Instant::now();
        status.record_failure("a", Duration::from_secs(10), now);
        assert!(!status.in_backoff(now));
        status.record_failure("b", Duration::from_secs(10), now);
        assert!(status.in_backoff(now));
        assert!(!status.in_backoff(now + Duration::from_secs(11)));
    }

    #[test]
    fn counters_never_exceed_their_thresholds() {
        let mut status = ProbeStatus::new(1, 2);
        let now = Instant::now();
        for _ in 0..10 {
            status.record_failure("a", Duration::from_millis(1), now);
        }
        assert_eq!(status.error_count, 2);
    }
}
