//! Response advisories produced by the engine.
//!
//! These are plain values; encoding them on the wire belongs to the
//! protocol layer.

use crate::error::PasswordPolicyError;

/// Warning element of the password policy response. At most one is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyWarning {
    TimeBeforeExpiration(i64),
    GraceAuthNsRemaining(i32),
}

/// Password policy response advisory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyResponse {
    pub warning: Option<PolicyWarning>,
    pub error: Option<PasswordPolicyError>,
}

/// Any advisory the engine may attach to a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseControl {
    Policy(PolicyResponse),
    /// Legacy "password expired" signal.
    PasswordExpired,
    /// Legacy "password expiring" signal with seconds left.
    PasswordExpiring(i64),
}

impl ResponseControl {
    pub(crate) fn error_only(error: Option<PasswordPolicyError>) -> Self {
        ResponseControl::Policy(PolicyResponse {
            warning: None,
            error,
        })
    }

    /// Builds the policy response. A non-negative warning wins over grace.
    pub(crate) fn policy(warn: Option<i64>, grace: Option<i32>, error: Option<PasswordPolicyError>) -> Self {
        let warning = match (warn, grace) {
            (Some(w), _) if w >= 0 => Some(PolicyWarning::TimeBeforeExpiration(w)),
            (_, Some(g)) if g >= 0 => Some(PolicyWarning::GraceAuthNsRemaining(g)),
            _ => None,
        };
        ResponseControl::Policy(PolicyResponse { warning, error })
    }

    pub fn policy_error(&self) -> Option<PasswordPolicyError> {
        match self {
            ResponseControl::Policy(resp) => resp.error,
            _ => None,
        }
    }
}

/// Reasons an account cannot be used, with timing detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnusableReasons {
    pub inactive: bool,
    pub reset: bool,
    pub expired: bool,
    pub remaining_grace: Option<i32>,
    pub seconds_before_unlock: Option<i64>,
}

/// Account usability response attached to search results on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountUsability {
    /// `None` when the password does not expire.
    Available { seconds_until_expiry: Option<i64> },
    Unavailable(UnusableReasons),
}
