//! Retry/Recovery Policy (§4.10): a closed decision table drives retry
//! behavior — a match statement over a closed enum, not free-form
//! error-string sniffing, except where transient-marker substring matching
//! is explicitly called for.

use std::time::Duration;

use crate::error::AgentErrorKind;

/// Substrings that mark a non-zero exit as transient (rate limiting,
/// connection resets) rather than a hard failure.
const TRANSIENT_MARKERS: &[&str] = &["rate_limit", "429", "ECONNRESET"];

/// What the scheduler should do next for a task that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry immediately (the caller still enforces `backoff` itself).
    Retry { backoff: Duration },
    /// Exhausted or inherently non-retriable; surface the failure.
    Surface,
    /// Cancellation is never retried, and never treated as a failure either.
    NotApplicable,
}

/// One row of the §4.10 decision table.
#[derive(Debug, Clone, Copy)]
struct Policy {
    retriable: bool,
    max_attempts: u32,
    base_backoff: Duration,
    cap_backoff: Duration,
}

fn policy_for(kind: &AgentErrorKind, stderr_tail: &str) -> Policy {
    match kind {
        AgentErrorKind::SpawnFailed | AgentErrorKind::WorkspaceCreationFailed => Policy {
            retriable: false,
            max_attempts: 0,
            base_backoff: Duration::ZERO,
            cap_backoff: Duration::ZERO,
        },
        AgentErrorKind::Timeout => Policy {
            retriable: true,
            max_attempts: 2,
            base_backoff: Duration::from_secs(2),
            cap_backoff: Duration::from_secs(30),
        },
        AgentErrorKind::NonZeroExit { .. } => {
            if TRANSIENT_MARKERS.iter().any(|m| stderr_tail.contains(m)) {
                Policy {
                    retriable: true,
                    max_attempts: 3,
                    base_backoff: Duration::from_secs(1),
                    cap_backoff: Duration::from_secs(15),
                }
            } else {
                Policy {
                    retriable: false,
                    max_attempts: 0,
                    base_backoff: Duration::ZERO,
                    cap_backoff: Duration::ZERO,
                }
            }
        }
        AgentErrorKind::RoundLimit
        | AgentErrorKind::StreamIoError
        | AgentErrorKind::AuthRequired => Policy {
            retriable: false,
            max_attempts: 0,
            base_backoff: Duration::ZERO,
            cap_backoff: Duration::ZERO,
        },
        AgentErrorKind::Cancelled => Policy {
            retriable: false,
            max_attempts: 0,
            base_backoff: Duration::ZERO,
            cap_backoff: Duration::ZERO,
        },
    }
}

/// Classifies a failure and decides whether the caller should retry.
///
/// `attempt` is 1-based: the attempt number that just failed. `stderr_tail`
/// is consulted only for `NonZeroExit`, to detect the transient markers
/// §4.10 names explicitly.
pub fn classify(kind: &AgentErrorKind, attempt: u32, stderr_tail: &str) -> RetryDecision {
    if matches!(kind, AgentErrorKind::Cancelled) {
        return RetryDecision::NotApplicable;
    }
    let policy = policy_for(kind, stderr_tail);
    if !policy.retriable || attempt >= policy.max_attempts {
        return RetryDecision::Surface;
    }
    let backoff = exponential_backoff(policy.base_backoff, attempt, policy.cap_backoff);
    RetryDecision::Retry { backoff }
}

fn exponential_backoff(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let scaled = base.saturating_mul(factor);
    scaled.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_never_retries() {
        let d = classify(&AgentErrorKind::SpawnFailed, 1, "");
        assert_eq!(d, RetryDecision::Surface);
    }

    #[test]
    fn timeout_retries_up_to_two_attempts() {
        assert_eq!(
            classify(&AgentErrorKind::Timeout, 1, ""),
            RetryDecision::Retry {
                backoff: Duration::from_secs(2)
            }
        );
        assert_eq!(classify(&AgentErrorKind::Timeout, 2, ""), RetryDecision::Surface);
    }

    #[test]
    fn transient_exit_retries_thrice_with_backoff_cap() {
        let kind = AgentErrorKind::NonZeroExit { exit_code: Some(1) };
        assert_eq!(
            classify(&kind, 1, "got rate_limit error"),
            RetryDecision::Retry {
                backoff: Duration::from_secs(1)
            }
        );
        assert_eq!(
            classify(&kind, 2, "429 too many requests"),
            RetryDecision::Retry {
                backoff: Duration::from_secs(2).min(Duration::from_secs(15))
            }
        );
        assert_eq!(classify(&kind, 3, "429"), RetryDecision::Surface);
    }

    #[test]
    fn non_transient_exit_never_retries() {
        let kind = AgentErrorKind::NonZeroExit { exit_code: Some(1) };
        assert_eq!(classify(&kind, 1, "syntax error"), RetryDecision::Surface);
    }

    #[test]
    fn cancellation_is_never_retried() {
        assert_eq!(
            classify(&AgentErrorKind::Cancelled, 1, ""),
            RetryDecision::NotApplicable
        );
    }

    #[test]
    fn round_limit_never_retries() {
        assert_eq!(classify(&AgentErrorKind::RoundLimit, 1, ""), RetryDecision::Surface);
    }
}
