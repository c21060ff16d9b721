//! Quota detection and the `QuotaPolicy` sleep-once-retry-once state
//! machine consulted by the execute wrapper.
//!
//! Detection is a `const` pattern list plus a pure classification function
//! rather than a stateful parser. `QuotaPolicy` deliberately sleeps and
//! retries exactly once instead of running an exponential backoff series —
//! see `DESIGN.md` for the reasoning.

use crate::domain::models::{QuotaState, QuotaStatus};

const QUOTA_EXHAUSTED_PATTERNS: &[&str] = &[
    "quota exceeded",
    "quota exhausted",
    "billing",
    "spending limit",
    "usage limit",
    "out of usage",
    "out of extra usage",
];

const RATE_LIMITED_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "too many requests",
    "overloaded",
];

const DEFAULT_RATE_LIMITED_RETRY_SECONDS: u64 = 60;

/// Scans combined stdout+stderr for known quota/rate-limit text patterns.
/// Exhaustion takes priority over rate-limiting when both appear.
pub fn detect_from_text(combined_output: &str) -> Option<QuotaState> {
    let haystack = combined_output.to_lowercase();

    if let Some(pattern) = QUOTA_EXHAUSTED_PATTERNS.iter().find(|p| haystack.contains(*p)) {
        return Some(QuotaState {
            status: QuotaStatus::QuotaExhausted,
            retry_after_seconds: None,
            message: format!("quota signal matched: \"{pattern}\""),
        });
    }

    if let Some(pattern) = RATE_LIMITED_PATTERNS.iter().find(|p| haystack.contains(*p)) {
        return Some(QuotaState {
            status: QuotaStatus::RateLimited,
            retry_after_seconds: Some(DEFAULT_RATE_LIMITED_RETRY_SECONDS),
            message: format!("rate-limit signal matched: \"{pattern}\""),
        });
    }

    None
}

/// The structured event payload some agent backends stream alongside
/// their text output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuotaEventPayload {
    pub status: Option<String>,
    pub rate_limit_type: Option<String>,
    /// Unix timestamp the quota/rate-limit resets at.
    pub resets_at: Option<i64>,
    pub overage_status: Option<String>,
}

/// Parses a structured quota event, given the current time (as a Unix
/// timestamp) to compute `retry_after_seconds` from `resets_at`.
pub fn detect_from_event(event: &QuotaEventPayload, now_unix: i64) -> Option<QuotaState> {
    let status = event.status.as_deref()?;
    if status != "rejected" {
        return None;
    }

    let retry_after = event
        .resets_at
        .map(|resets_at| (resets_at - now_unix).max(0) as u64);

    let is_exhausted = matches!(
        event.overage_status.as_deref(),
        Some("disabled") | Some("rejected")
    );

    if is_exhausted {
        Some(QuotaState {
            status: QuotaStatus::QuotaExhausted,
            retry_after_seconds: retry_after,
            message: "structured event: overage status rejected".to_string(),
        })
    } else {
        Some(QuotaState {
            status: QuotaStatus::RateLimited,
            retry_after_seconds: retry_after.or(Some(DEFAULT_RATE_LIMITED_RETRY_SECONDS)),
            message: event
                .rate_limit_type
                .clone()
                .unwrap_or_else(|| "structured event: rate limited".to_string()),
        })
    }
}

/// The sleep-once-retry-once policy the execute wrapper consults exactly
/// once per quota-limited result.
#[derive(Clone, Copy, Debug)]
pub struct QuotaPolicy {
    pub sleep_rate_limited_seconds: u64,
    pub sleep_exhausted_seconds: u64,
    pub sleep_max_seconds: u64,
}

impl QuotaPolicy {
    pub fn new(sleep_rate_limited_seconds: u64, sleep_exhausted_seconds: u64, sleep_max_seconds: u64) -> Self {
        Self {
            sleep_rate_limited_seconds,
            sleep_exhausted_seconds,
            sleep_max_seconds,
        }
    }

    /// How long the wrapper should sleep before its single retry, capped
    /// at `sleep_max_seconds`.
    pub fn sleep_seconds(&self, quota: &QuotaState) -> u64 {
        let base = quota.retry_after_seconds.unwrap_or_else(|| match quota.status {
            QuotaStatus::RateLimited => self.sleep_rate_limited_seconds,
            QuotaStatus::QuotaExhausted => self.sleep_exhausted_seconds,
            QuotaStatus::Ok => 0,
        });
        base.min(self.sleep_max_seconds)
    }
}
