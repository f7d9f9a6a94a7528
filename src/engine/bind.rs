//! Bind, compare and account usability.

use secrecy::{ExposeSecret, SecretString};

use super::{BindOutcome, OpContext, PolicyEngine};
use crate::controls::{AccountUsability, ResponseControl};
use crate::error::{PasswordPolicyError, Rejection, ResultCode};
use crate::session::OperationKind;
use crate::state::{Attr, Mutation};
use crate::time::format_seconds;
use crate::{dn, expiry, failure, lockout};

impl PolicyEngine {
    /// Authenticates `dn` with `password` and runs the policy bookkeeping
    /// for the attempt.
    ///
    /// Every bind lifts the connection's restriction first. A successful
    /// bind with a pending mandatory reset restricts the connection to
    /// password changes for `dn`.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The request context
    /// * `dn` - The identity being authenticated
    /// * `password` - The supplied credential
    ///
    /// # Returns
    ///
    /// The result code, the policy detail and the state changes that were
    /// written for this attempt.
    pub fn bind(&self, ctx: &OpContext, dn: &str, password: &SecretString) -> BindOutcome {
        self.sessions.clear(ctx.conn);
        self.authenticate(ctx, dn, password.expose_secret().as_bytes(), true)
    }

    /// Compares `value` against `attribute` of `dn`.
    ///
    /// A password compare carrying the policy request is handled like a
    /// bind without restricting the connection. A compare of
    /// `pwdPolicySubentry` is answered from the effective policy.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] when the connection is restricted or the entry does
    /// not exist.
    pub fn compare(&self, ctx: &OpContext, dn: &str, attribute: &str, value: &[u8]) -> Result<BindOutcome, Rejection> {
        self.check_restriction(ctx, OperationKind::Compare)?;
        let attr = Attr::from_name(attribute);

        if attr == Attr::Password && ctx.policy_control {
            let mut outcome = self.authenticate(ctx, dn, value, false);
            outcome.code = match outcome.code {
                ResultCode::Success => ResultCode::CompareTrue,
                ResultCode::InvalidCredentials => ResultCode::CompareFalse,
                other => other,
            };
            return Ok(outcome);
        }

        let entry = self
            .load(dn)
            .ok_or_else(|| Rejection::plain(ResultCode::NoSuchObject, "No such object"))?;
        let matched = match attr {
            Attr::Password => entry
                .passwords
                .iter()
                .any(|stored| self.schemes.verify(stored, value)),
            Attr::PolicySubentry => {
                let asserted = dn::normalize_lossy(&String::from_utf8_lossy(value));
                self.policies
                    .snapshot()
                    .effective_policy_id(&entry)
                    .is_some_and(|(id, _)| id == asserted)
            }
            _ => {
                let asserted = String::from_utf8_lossy(value);
                entry
                    .values_of(attribute)
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(&asserted))
            }
        };
        Ok(BindOutcome::plain(if matched {
            ResultCode::CompareTrue
        } else {
            ResultCode::CompareFalse
        }))
    }

    /// Usability of `dn` for a search that asked for it.
    ///
    /// # Returns
    ///
    /// `None` when the request did not ask, the entry does not exist or has
    /// no password, or no configured policy governs it.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] when the connection is restricted.
    pub fn account_usability(&self, ctx: &OpContext, dn: &str) -> Result<Option<AccountUsability>, Rejection> {
        self.check_restriction(ctx, OperationKind::Search)?;
        if !ctx.usability_control {
            return Ok(None);
        }
        let Some(entry) = self.load(dn) else {
            return Ok(None);
        };
        if entry.passwords.is_empty() {
            return Ok(None);
        }
        let resolved = self.policies.resolve(&entry);
        if resolved.is_built_in() {
            return Ok(None);
        }
        let now = self.clock.now().timestamp();
        Ok(Some(expiry::account_usability(&entry, &resolved.record, now)))
    }

    fn authenticate(&self, ctx: &OpContext, dn: &str, password: &[u8], restrict: bool) -> BindOutcome {
        if self.is_root(dn) {
            let verified = self
                .load(dn)
                .is_some_and(|e| e.passwords.iter().any(|p| self.schemes.verify(p, password)));
            return BindOutcome::plain(if verified {
                ResultCode::Success
            } else {
                ResultCode::InvalidCredentials
            });
        }

        let _guard = self.bind_guard();
        let Some(entry) = self.load(dn) else {
            return BindOutcome::plain(ResultCode::InvalidCredentials);
        };
        let resolved = self.policies.resolve(&entry);
        let policy = resolved.record.as_ref();
        let now = self.clock.now();
        let mut outcome = BindOutcome::plain(ResultCode::Success);
        let mut expired = false;

        let lock = if resolved.is_built_in() {
            lockout::LockStatus::default()
        } else {
            lockout::evaluate(&entry, policy, now.timestamp())
        };
        outcome.mutations.extend(lock.mutation.clone());

        if lock.is_locked() {
            #[cfg(feature = "tracing")]
            tracing::info!("bind to locked account {}: {:?}", entry.dn, lock.reason);
            outcome.code = ResultCode::InvalidCredentials;
            outcome.error = Some(PasswordPolicyError::AccountLocked);
        } else if entry.passwords.is_empty() {
            outcome.code = ResultCode::InvalidCredentials;
        } else if !entry.passwords.iter().any(|p| self.schemes.verify(p, password)) {
            outcome.code = ResultCode::InvalidCredentials;
            let recorded = failure::record_failure(&entry, policy, now);
            outcome.mutations.extend(recorded.mutations);
        } else {
            outcome.mutations.extend(failure::clear_on_success(&entry));
            let verdict = expiry::on_success(&entry, policy, now);
            expired = verdict.expired;
            outcome.error = verdict.error;
            outcome.warning_seconds = verdict.warning;
            outcome.grace_remaining = verdict.grace_remaining;
            outcome.mutations.extend(verdict.mutations.iter().cloned());
            if verdict.is_refused() {
                outcome.code = ResultCode::InvalidCredentials;
            } else {
                if verdict.error == Some(PasswordPolicyError::ChangeAfterReset) && restrict {
                    self.sessions.restrict(ctx.conn, dn);
                }
                if self.config.track_last_success {
                    outcome
                        .mutations
                        .push(Mutation::replace_str(Attr::LastSuccess, format_seconds(now.timestamp())));
                }
            }
        }

        self.write_state(dn, &outcome.mutations);
        outcome.control = self.bind_control(ctx, &outcome, expired);
        outcome
    }

    fn bind_control(&self, ctx: &OpContext, outcome: &BindOutcome, expired: bool) -> Option<ResponseControl> {
        if ctx.policy_control {
            let error = outcome
                .error
                .filter(|e| self.config.use_lockout || *e != PasswordPolicyError::AccountLocked);
            return Some(ResponseControl::policy(
                outcome.warning_seconds,
                outcome.grace_remaining,
                error,
            ));
        }
        if !self.config.send_netscape_controls {
            return None;
        }
        if outcome.error.is_some() || expired {
            return Some(ResponseControl::PasswordExpired);
        }
        outcome
            .warning_seconds
            .filter(|w| *w > 0)
            .map(ResponseControl::PasswordExpiring)
    }
}

