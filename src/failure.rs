//! Failure counting, backoff and lockout transitions.

use chrono::{DateTime, Utc};

use crate::policy::PolicyRecord;
use crate::state::{AccountState, Attr, Mutation};
use crate::time::{format_micros, format_seconds, parse_seconds};

/// What a failed attempt does to the account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureOutcome {
    pub mutations: Vec<Mutation>,
    /// Live failures before this one.
    pub live_failures: u32,
    pub locked: bool,
    /// Backoff applied, in seconds.
    pub delay: Option<i64>,
}

/// Backoff for the attempt after `live_failures` earlier ones:
/// `min_delay * 2^live_failures`, capped at `max_delay`.
pub fn backoff_seconds(min_delay: u32, max_delay: u32, live_failures: u32) -> i64 {
    let min = i64::from(min_delay);
    let max = i64::from(max_delay);
    if live_failures >= 62 {
        return max;
    }
    min.saturating_mul(1i64 << live_failures).min(max)
}

/// Records a failed attempt. Does nothing unless the policy records
/// failures (`max_recorded_failure > 0`).
pub fn record_failure(state: &AccountState, policy: &PolicyRecord, now: DateTime<Utc>) -> FailureOutcome {
    let mut outcome = FailureOutcome::default();
    if policy.max_recorded_failure == 0 {
        return outcome;
    }
    let now_secs = now.timestamp();
    let stamp = format_micros(now);

    // Unparseable stamps sort first so they are trimmed before real ones.
    let mut existing: Vec<(Option<i64>, &String)> = state
        .failure_times
        .iter()
        .map(|v| (parse_seconds(v), v))
        .collect();
    existing.sort_by_key(|(t, _)| t.unwrap_or(i64::MIN));

    let interval = i64::from(policy.failure_count_interval);
    let live = existing
        .iter()
        .filter(|(t, _)| interval == 0 || t.is_some_and(|t| now_secs <= t + interval))
        .count();
    outcome.live_failures = u32::try_from(live).unwrap_or(u32::MAX);

    let max = policy.max_recorded_failure as usize;
    let count = existing.len();
    if count >= max {
        let keep = max - 1;
        if count >= 2 * max {
            let mut values: Vec<Vec<u8>> = existing[count - keep..]
                .iter()
                .map(|(_, v)| v.as_bytes().to_vec())
                .collect();
            values.push(stamp.into_bytes());
            outcome.mutations.push(Mutation::Replace {
                attr: Attr::FailureTime,
                values,
            });
        } else {
            outcome.mutations.push(Mutation::DeleteValues {
                attr: Attr::FailureTime,
                values: existing[..count - keep]
                    .iter()
                    .map(|(_, v)| v.as_bytes().to_vec())
                    .collect(),
            });
            outcome.mutations.push(Mutation::add_str(Attr::FailureTime, stamp));
        }
    } else {
        outcome.mutations.push(Mutation::add_str(Attr::FailureTime, stamp));
    }

    // The failure being recorded is not counted yet, hence the -1.
    if policy.max_failure > 0 && outcome.live_failures >= policy.max_failure - 1 {
        outcome.locked = true;
        outcome.mutations.push(Mutation::replace_str(
            Attr::AccountLockedTime,
            format_seconds(now_secs),
        ));
        #[cfg(feature = "tracing")]
        tracing::info!(
            "locking {} after {} failures",
            state.dn,
            outcome.live_failures + 1
        );
    } else if policy.min_delay > 0 {
        let wait = backoff_seconds(policy.min_delay, policy.max_delay, outcome.live_failures);
        outcome.delay = Some(wait);
        outcome.mutations.push(Mutation::replace_str(
            Attr::TmpLockoutEnd,
            format_seconds(now_secs + wait),
        ));
        #[cfg(feature = "tracing")]
        tracing::debug!("delaying {} for {}s", state.dn, wait);
    }
    outcome
}

/// Clears recorded failures after a successful attempt.
pub fn clear_on_success(state: &AccountState) -> Option<Mutation> {
    (!state.failure_times.is_empty()).then_some(Mutation::Delete {
        attr: Attr::FailureTime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NOW: i64 = 1_700_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn stamps(n: usize, start: i64) -> Vec<String> {
        (0..n)
            .map(|i| format_micros(at(start + i as i64)))
            .collect()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let waits: Vec<i64> = (0..5).map(|fc| backoff_seconds(1, 8, fc)).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 8]);
        assert_eq!(backoff_seconds(3, 1000, 100), 1000);
        assert_eq!(backoff_seconds(u32::MAX, u32::MAX, 61), i64::from(u32::MAX));
    }

    #[test]
    fn test_no_recording_without_limit() {
        let st = AccountState::new("uid=a");
        let out = record_failure(&st, &PolicyRecord::default(), at(NOW));
        assert!(out.mutations.is_empty());
    }

    #[test]
    fn test_lock_at_threshold() {
        let policy = PolicyRecord {
            max_failure: 3,
            lockout: true,
            ..Default::default()
        }
        .normalized();
        let mut st = AccountState::new("uid=a");
        st.failure_times = stamps(1, NOW - 10);
        let out = record_failure(&st, &policy, at(NOW));
        assert!(!out.locked);

        st.failure_times = stamps(2, NOW - 10);
        let out = record_failure(&st, &policy, at(NOW));
        assert!(out.locked);
        assert_eq!(out.delay, None);
        assert!(matches!(
            out.mutations.last(),
            Some(Mutation::Replace { attr: Attr::AccountLockedTime, .. })
        ));
    }

    #[test]
    fn test_interval_ages_out_failures() {
        let policy = PolicyRecord {
            max_failure: 3,
            failure_count_interval: 60,
            ..Default::default()
        }
        .normalized();
        let mut st = AccountState::new("uid=a");
        st.failure_times = vec![
            format_micros(at(NOW - 500)),
            format_micros(at(NOW - 400)),
        ];
        let out = record_failure(&st, &policy, at(NOW));
        assert_eq!(out.live_failures, 0);
        assert!(!out.locked);
    }

    #[test]
    fn test_trim_keeps_newest() {
        let policy = PolicyRecord {
            max_recorded_failure: 3,
            ..Default::default()
        };
        let mut st = AccountState::new("uid=a");
        st.failure_times = stamps(4, NOW - 100);
        let out = record_failure(&st, &policy, at(NOW));
        st.apply(&out.mutations);
        assert_eq!(st.failure_times.len(), 3);
        assert_eq!(st.failure_times[0], format_micros(at(NOW - 98)));
        assert_eq!(st.failure_times[2], format_micros(at(NOW)));
    }

    #[test]
    fn test_trim_replaces_when_far_over() {
        let policy = PolicyRecord {
            max_recorded_failure: 2,
            ..Default::default()
        };
        let mut st = AccountState::new("uid=a");
        st.failure_times = stamps(5, NOW - 100);
        let out = record_failure(&st, &policy, at(NOW));
        assert!(matches!(out.mutations[0], Mutation::Replace { .. }));
        st.apply(&out.mutations);
        assert_eq!(
            st.failure_times,
            vec![format_micros(at(NOW - 96)), format_micros(at(NOW))]
        );
    }

    #[test]
    fn test_malformed_stamps_trimmed_first() {
        let policy = PolicyRecord {
            max_recorded_failure: 2,
            ..Default::default()
        };
        let mut st = AccountState::new("uid=a");
        st.failure_times = vec![format_micros(at(NOW - 5)), "junk".to_string()];
        let out = record_failure(&st, &policy, at(NOW));
        st.apply(&out.mutations);
        assert_eq!(
            st.failure_times,
            vec![format_micros(at(NOW - 5)), format_micros(at(NOW))]
        );
    }

    #[test]
    fn test_clear_on_success() {
        let mut st = AccountState::new("uid=a");
        assert_eq!(clear_on_success(&st), None);
        st.failure_times = stamps(1, NOW);
        assert_eq!(
            clear_on_success(&st),
            Some(Mutation::Delete {
                attr: Attr::FailureTime
            })
        );
    }
}
