//! Lock and validity state of an account.

use crate::policy::PolicyRecord;
use crate::state::{AccountState, Attr, Mutation};
use crate::time::parse_seconds;

/// Why an account is currently unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    NotYetValid,
    ValidityEnded,
    /// Inside a failure backoff window.
    Backoff,
    Idle,
    /// Locked after too many failures; `until` is `None` for a permanent lock.
    Locked { until: Option<i64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockStatus {
    pub reason: Option<LockReason>,
    /// Set when an expired lock should be removed from the entry.
    pub mutation: Option<Mutation>,
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        self.reason.is_some()
    }

    fn locked(reason: LockReason) -> Self {
        Self {
            reason: Some(reason),
            mutation: None,
        }
    }
}

/// Evaluates the lock state at `now` (seconds).
///
/// Checks run in a fixed order and stop at the first lock. Unparseable
/// validity, backoff or lock stamps lock the account.
pub fn evaluate(state: &AccountState, policy: &PolicyRecord, now: i64) -> LockStatus {
    if let Some(start) = &state.start_time {
        match parse_seconds(start) {
            Some(t) if now >= t => {}
            _ => return LockStatus::locked(LockReason::NotYetValid),
        }
    }
    if let Some(end) = &state.end_time {
        match parse_seconds(end) {
            Some(t) if now < t => {}
            _ => return LockStatus::locked(LockReason::ValidityEnded),
        }
    }

    if !policy.lockout {
        return LockStatus::default();
    }

    if let Some(end) = &state.tmp_lockout_end {
        match parse_seconds(end) {
            Some(t) if now >= t => {}
            _ => return LockStatus::locked(LockReason::Backoff),
        }
    }

    if policy.max_idle > 0 {
        let last = state
            .last_success
            .as_deref()
            .or(state.changed_time.as_deref())
            .and_then(parse_seconds);
        if let Some(last) = last {
            if now > last + i64::from(policy.max_idle) {
                return LockStatus::locked(LockReason::Idle);
            }
        }
    }

    if let Some(locked_at) = &state.account_locked_time {
        let Some(then) = parse_seconds(locked_at) else {
            return LockStatus::locked(LockReason::Locked { until: None });
        };
        if now < then {
            // not yet in effect
            return LockStatus::default();
        }
        if policy.lockout_duration == 0 {
            return LockStatus::locked(LockReason::Locked { until: None });
        }
        let until = then + i64::from(policy.lockout_duration);
        if now < until {
            return LockStatus::locked(LockReason::Locked { until: Some(until) });
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("lock on {} expired, clearing it", state.dn);
        return LockStatus {
            reason: None,
            mutation: Some(Mutation::Delete {
                attr: Attr::AccountLockedTime,
            }),
        };
    }

    LockStatus::default()
}

/// Seconds until a lock or backoff window ends, `None` when the account
/// is not locked that way or the lock is permanent.
pub fn seconds_until_unlock(state: &AccountState, policy: &PolicyRecord, now: i64) -> Option<i64> {
    let mut end: Option<i64> = None;
    if let Some(then) = state.account_locked_time.as_deref().and_then(parse_seconds) {
        if now >= then && policy.lockout_duration > 0 {
            let until = then + i64::from(policy.lockout_duration);
            if until > now {
                end = Some(until);
            }
        }
    }
    if let Some(tmp) = state.tmp_lockout_end.as_deref().and_then(parse_seconds) {
        if tmp > now && end.is_none_or(|e| tmp > e) {
            end = Some(tmp);
        }
    }
    end.map(|e| e - now)
}
