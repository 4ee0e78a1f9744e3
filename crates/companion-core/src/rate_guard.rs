//! ============================================================================
//! Rate Guard - Sliding-window admission control
//! ============================================================================
//! Caps how many requests one subject may make inside a trailing window.
//! The counter update is transactional at the store layer, so concurrent
//! requests cannot both take the last slot.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::db::CompanionDb;

/// Default admissions per window.
pub const DEFAULT_QUOTA: u32 = 6;

/// Default trailing window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one admission attempt. Denial is a decision, not an error.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Slots left in the trailing window after this attempt.
    pub remaining: u32,
    /// When denied, how long until the window opens up again.
    pub retry_after_ms: Option<i64>,
}

/// Per-subject sliding-window admission controller
pub struct RateGuard {
    db: Arc<CompanionDb>,
    quota: u32,
    window: Duration,
}

impl RateGuard {
    pub fn new(db: Arc<CompanionDb>) -> Self {
        Self {
            db,
            quota: DEFAULT_QUOTA,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_limits(mut self, quota: u32, window: Duration) -> Self {
        self.quota = quota;
        self.window = window;
        self
    }

    /// Admit or deny a request for the subject right now.
    pub fn admit(&self, subject: &str) -> Result<RateDecision> {
        self.admit_at(subject, chrono::Utc::now().timestamp_millis())
    }

    fn admit_at(&self, subject: &str, now_ms: i64) -> Result<RateDecision> {
        let outcome = self
            .db
            .rate_hit(subject, now_ms, self.window.as_millis() as i64, self.quota)?;

        let decision = RateDecision {
            allowed: outcome.allowed,
            limit: self.quota,
            remaining: self.quota.saturating_sub(outcome.used),
            retry_after_ms: (!outcome.allowed).then_some(outcome.window_remaining_ms),
        };

        if !decision.allowed {
            debug!(
                "Rate limited subject {} (retry in {} ms)",
                subject,
                decision.retry_after_ms.unwrap_or(0)
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::temp_db;

    const WINDOW_MS: i64 = 60_000;

    fn guard() -> RateGuard {
        RateGuard::new(temp_db()).with_limits(6, Duration::from_secs(60))
    }

    #[test]
    fn test_quota_admits_then_denies() {
        let guard = guard();
        let base = 10 * WINDOW_MS;

        for i in 0..6 {
            let decision = guard.admit_at("user", base + i * 1_000).unwrap();
            assert!(decision.allowed, "admission {} should pass", i);
        }

        let denied = guard.admit_at("user", base + 6_000).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_ms.unwrap() > 0);
    }

    #[test]
    fn test_window_elapses_and_admission_resumes() {
        let guard = guard();
        let base = 10 * WINDOW_MS;

        for _ in 0..6 {
            assert!(guard.admit_at("user", base).unwrap().allowed);
        }
        assert!(!guard.admit_at("user", base).unwrap().allowed);

        // The start of the next fixed window still carries the previous
        // window's full weight; the trailing constraint holds.
        assert!(!guard.admit_at("user", base + WINDOW_MS).unwrap().allowed);

        // Once the window has fully elapsed, admission resumes.
        assert!(guard.admit_at("user", base + 2 * WINDOW_MS).unwrap().allowed);
    }

    #[test]
    fn test_subjects_are_isolated() {
        let guard = guard();
        let base = 10 * WINDOW_MS;

        for _ in 0..6 {
            assert!(guard.admit_at("alice", base).unwrap().allowed);
        }
        assert!(!guard.admit_at("alice", base).unwrap().allowed);
        assert!(guard.admit_at("bob", base).unwrap().allowed);
    }

    #[test]
    fn test_remaining_counts_down() {
        let guard = guard();
        let base = 10 * WINDOW_MS;

        let first = guard.admit_at("user", base).unwrap();
        assert_eq!(first.limit, 6);
        assert_eq!(first.remaining, 5);

        let second = guard.admit_at("user", base).unwrap();
        assert_eq!(second.remaining, 4);
    }
}
