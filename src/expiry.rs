//! Password age, grace logins, expiry warnings and account usability.

use chrono::{DateTime, Utc};

use crate::controls::{AccountUsability, UnusableReasons};
use crate::error::PasswordPolicyError;
use crate::lockout::{self, LockReason};
use crate::policy::PolicyRecord;
use crate::state::{AccountState, Attr, Mutation};
use crate::time::{format_micros, parse_seconds};

/// Expiry evaluation of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExpiryOutcome {
    /// `ChangeAfterReset` (still allowed, restricted) or `PasswordExpired`
    /// (refused).
    pub error: Option<PasswordPolicyError>,
    pub expired: bool,
    /// Seconds until expiry, when inside the warning window.
    pub warning: Option<i64>,
    /// Grace logins left after this one. Negative when none were left.
    pub grace_remaining: Option<i32>,
    pub mutations: Vec<Mutation>,
}

impl ExpiryOutcome {
    pub fn is_refused(&self) -> bool {
        self.error == Some(PasswordPolicyError::PasswordExpired)
    }
}

/// Evaluates a successful authentication at `now`.
///
/// A pending mandatory reset takes precedence over expiry. An expired
/// password consumes a grace login; with none left the attempt is refused.
pub fn on_success(state: &AccountState, policy: &PolicyRecord, now: DateTime<Utc>) -> ExpiryOutcome {
    let mut outcome = ExpiryOutcome::default();
    let now_secs = now.timestamp();
    let changed = state.changed_time.as_deref().and_then(parse_seconds);
    let max_age = i64::from(policy.max_age);

    if policy.must_change && state.reset {
        outcome.error = Some(PasswordPolicyError::ChangeAfterReset);
    } else if max_age > 0 {
        if let Some(pwtime) = changed {
            outcome.expired = now_secs - pwtime > max_age;
        }
    }

    if outcome.expired {
        // expired implies changed is set
        let pwtime = changed.unwrap_or(now_secs);
        let mut remaining: i64 = if policy.grace_expiry > 0
            && now_secs - pwtime > max_age + i64::from(policy.grace_expiry)
        {
            0
        } else {
            i64::from(policy.grace_authn_limit) - state.grace_use_times.len() as i64
        };
        #[cfg(feature = "tracing")]
        tracing::info!(
            "{} has an expired password: {} grace logins",
            state.dn,
            remaining
        );
        remaining -= 1;
        outcome.grace_remaining = Some(i32::try_from(remaining).unwrap_or(i32::MIN));
        if remaining < 0 {
            outcome.error = Some(PasswordPolicyError::PasswordExpired);
            return outcome;
        }
        outcome
            .mutations
            .push(Mutation::add_str(Attr::GraceUseTime, format_micros(now)));
        return outcome;
    }

    if max_age > 0 && policy.expire_warning > 0 {
        if let Some(pwtime) = changed {
            let left = max_age - (now_secs - pwtime);
            if left < i64::from(policy.expire_warning) {
                outcome.warning = Some(left.max(0));
                #[cfg(feature = "tracing")]
                tracing::debug!("{} password expires in {}s", state.dn, left.max(0));
            }
        }
    }
    outcome
}

/// Minimum age check for a password change. Skipped while a reset is pending.
pub fn too_young(state: &AccountState, policy: &PolicyRecord, now: i64) -> bool {
    if state.reset || policy.min_age == 0 {
        return false;
    }
    match state.changed_time.as_deref().and_then(parse_seconds) {
        Some(pwtime) => now - pwtime < i64::from(policy.min_age),
        None => false,
    }
}

/// Usability of an account as reported to searches.
pub fn account_usability(state: &AccountState, policy: &PolicyRecord, now: i64) -> AccountUsability {
    let changed = state.changed_time.as_deref().and_then(parse_seconds);
    let mut until_expiry: Option<i64> = None;
    let mut expired = false;
    let mut grace: Option<i32> = None;

    if let (true, Some(pwtime)) = (policy.max_age > 0, changed) {
        let left = pwtime + i64::from(policy.max_age) - now;
        until_expiry = Some(left);
        if left <= 0 {
            expired = true;
        }
        if policy.grace_authn_limit > 0
            && (policy.grace_expiry == 0 || left + i64::from(policy.grace_expiry) > 0)
        {
            let used = i32::try_from(state.grace_use_times.len()).unwrap_or(i32::MAX);
            let limit = i32::try_from(policy.grace_authn_limit).unwrap_or(i32::MAX);
            grace = Some(limit.saturating_sub(used));
        }
    }

    if !expired && policy.max_idle > 0 {
        if let Some(last) = state.last_success.as_deref().and_then(parse_seconds) {
            let idle_left = last + i64::from(policy.max_idle) - now;
            if idle_left <= 0 {
                expired = true;
            } else if until_expiry.is_none_or(|u| idle_left < u) {
                until_expiry = Some(idle_left);
            }
        }
    }

    let lock = lockout::evaluate(state, policy, now);
    if !expired && !lock.is_locked() {
        return AccountUsability::Available {
            seconds_until_expiry: until_expiry,
        };
    }

    let mut reasons = UnusableReasons {
        expired,
        remaining_grace: if expired { grace } else { None },
        reset: policy.must_change && state.reset,
        ..Default::default()
    };
    match lock.reason {
        Some(LockReason::Locked { until: None })
        | Some(LockReason::NotYetValid)
        | Some(LockReason::ValidityEnded) => reasons.inactive = true,
        Some(_) => {
            if let Some(secs) = lockout::seconds_until_unlock(state, policy, now) {
                reasons.inactive = true;
                reasons.seconds_before_unlock = Some(secs);
            }
        }
        None => {}
    }
    AccountUsability::Unavailable(reasons)
}
