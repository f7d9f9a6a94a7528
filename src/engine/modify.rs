//! Add and modify: password quality, history, safe modify and the state
//! bookkeeping that follows a password change.

use secrecy::ExposeSecret;
use secrecy::zeroize::Zeroize;

use super::{ModifyRequest, OpContext, PolicyEngine, restricted};
use crate::error::{PasswordPolicyError, Rejection, ResultCode};
use crate::history::{self, HistoryEntry};
use crate::policy::PolicyRecord;
use crate::scheme::scheme_of;
use crate::session::OperationKind;
use crate::state::{AccountState, Attr, Mutation};
use crate::store::WriteRoute;
use crate::time::format_seconds;
use crate::{dn, expiry};

const ONE_VALUE: &str = "Password policy only allows one password value";

/// State attributes cleared by a password change.
const STALE_ON_CHANGE: [Attr; 4] = [
    Attr::GraceUseTime,
    Attr::AccountLockedTime,
    Attr::FailureTime,
    Attr::LastSuccess,
];

/// What a modify request does to the password and the policy state.
#[derive(Debug, Default)]
struct ModScan {
    pwmod: bool,
    /// The last password change is a delete.
    pw_delete: bool,
    /// 1 after a delete of specific password values, 2 once a new value
    /// follows it.
    deladd: u8,
    delmod: Option<usize>,
    addmod: Option<usize>,
    /// Only the password and operational attributes are touched.
    pw_only: bool,
    zap_reset: bool,
    got_changed: bool,
    got_history: bool,
    deleted: Vec<Attr>,
}

impl ModScan {
    fn of(mutations: &[Mutation]) -> Result<Self, Rejection> {
        let mut scan = ModScan {
            pw_only: true,
            zap_reset: true,
            ..Default::default()
        };
        for (i, m) in mutations.iter().enumerate() {
            let attr = m.attr();
            match attr {
                Attr::Password => {
                    scan.pwmod = true;
                    scan.pw_delete = m.is_delete();
                    if m.is_delete() && !m.values().is_empty() {
                        scan.deladd = 1;
                        scan.delmod = Some(i);
                    } else if !m.is_delete() && !m.values().is_empty() {
                        if scan.addmod.is_some() || m.values().len() > 1 {
                            return Err(Rejection::plain(ResultCode::ConstraintViolation, ONE_VALUE));
                        }
                        scan.addmod = Some(i);
                        if scan.deladd == 1 {
                            scan.deladd = 2;
                        }
                    }
                }
                Attr::ChangedTime => scan.got_changed = true,
                Attr::History => scan.got_history = true,
                Attr::Reset if !m.is_delete() => scan.zap_reset = false,
                Attr::Other(_) => scan.pw_only = false,
                _ => {}
            }
            if m.is_delete() && STALE_ON_CHANGE.contains(attr) {
                scan.deleted.push(attr.clone());
            }
        }
        Ok(scan)
    }

    fn got_del(&self, attr: &Attr) -> bool {
        self.deleted.contains(attr)
    }
}

impl PolicyEngine {
    /// Applies the policy to an entry about to be added.
    ///
    /// Enforces a single password value and the quality check, hashes a
    /// cleartext value when configured to, and stamps `pwdChangedTime`
    /// when password aging is in effect. `entry` is updated in place.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] when the connection is restricted or the password
    /// is refused.
    pub fn add(&self, ctx: &OpContext, entry: &mut AccountState) -> Result<(), Rejection> {
        self.check_restriction(ctx, OperationKind::Add)?;
        if ctx.replication || entry.passwords.is_empty() {
            return Ok(());
        }
        if entry.passwords.len() > 1 {
            return Err(Rejection::plain(ResultCode::ConstraintViolation, ONE_VALUE)
                .with_control(ctx.policy_control));
        }
        let resolved = self.policies.resolve(entry);
        let policy = resolved.record.as_ref();

        if policy.check_quality.enabled() && !ctx.password_admin {
            self.quality()
                .check(&entry.passwords[0], policy, entry)
                .map_err(|v| {
                    Rejection::new(ResultCode::ConstraintViolation, v.error, v.text())
                        .with_control(ctx.policy_control)
                })?;
        }

        if self.config.hash_cleartext {
            self.hash_in_place(&mut entry.passwords[0])?;
        }

        if (policy.max_age > 0 || policy.min_age > 0) && entry.changed_time.is_none() {
            entry.changed_time = Some(format_seconds(self.clock.now().timestamp()));
        }
        Ok(())
    }

    /// Applies a modify request, enforcing the policy on password changes.
    ///
    /// On success the request's changes plus the policy bookkeeping are
    /// written to the store as one batch, and the batch is returned.
    ///
    /// # Errors
    ///
    /// A [`Rejection`] when the change is refused or the store write fails.
    pub fn modify(&self, ctx: &OpContext, req: ModifyRequest) -> Result<Vec<Mutation>, Rejection> {
        let Some(entry) = self.load(&req.dn) else {
            return Err(Rejection::plain(ResultCode::NoSuchObject, "No such object"));
        };
        let mut mods = req.mutations.clone();

        if self.config.disable_write {
            return self.commit(&req.dn, mods);
        }
        if ctx.replication {
            let mods = replica_mods(&entry, mods);
            return self.commit(&req.dn, mods);
        }

        let mut scan = ModScan::of(&mods).map_err(|r| r.with_control(ctx.policy_control))?;

        if let Some(identity) = self.sessions.restricted(ctx.conn) {
            if !scan.pw_only {
                if identity == dn::normalize_lossy(&ctx.bound_dn) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("connection {} may only change its password", ctx.conn);
                    return Err(restricted().with_control(ctx.policy_control));
                }
                self.sessions.clear(ctx.conn);
            }
        }

        let resolved = self.policies.resolve(&entry);
        let policy = resolved.record.as_ref();
        let hist = if policy.in_history > 0 {
            history::build(&entry.history)
        } else {
            Vec::new()
        };

        if scan.pwmod && !ctx.password_admin {
            stage_old_password(&req, &mut scan, &mut mods);
        }
        if scan.pwmod && !resolved.is_built_in() {
            self.check_change(ctx, &req, &entry, policy, &hist, &mut scan, &mut mods)
                .map_err(|r| r.with_control(ctx.policy_control))?;
        } else if scan.pwmod && !ctx.password_admin {
            self.verify_old_password(&entry, &scan, &mut mods)
                .map_err(|r| r.with_control(ctx.policy_control))?;
        }

        if scan.pwmod {
            self.change_bookkeeping(ctx, &req.dn, &entry, policy, &hist, &scan, &mut mods)?;
        } else if scan.got_del(&Attr::AccountLockedTime)
            && !scan.got_del(&Attr::FailureTime)
            && entry.has(&Attr::FailureTime)
        {
            mods.push(Mutation::Delete {
                attr: Attr::FailureTime,
            });
        }

        let mods = self.commit(&req.dn, mods)?;
        if scan.pwmod
            && self
                .sessions
                .restricted(ctx.conn)
                .is_some_and(|id| id == dn::normalize_lossy(&ctx.bound_dn))
        {
            self.sessions.clear(ctx.conn);
        }
        Ok(mods)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_change(
        &self,
        ctx: &OpContext,
        req: &ModifyRequest,
        entry: &AccountState,
        policy: &PolicyRecord,
        hist: &[HistoryEntry],
        scan: &mut ModScan,
        mods: &mut Vec<Mutation>,
    ) -> Result<(), Rejection> {
        if ctx.password_admin {
            return Ok(());
        }
        if !policy.allow_user_change && dn::normalize_lossy(&req.dn) == dn::normalize_lossy(&ctx.bound_dn) {
            return Err(Rejection::new(
                ResultCode::InsufficientAccess,
                PasswordPolicyError::PasswordModNotAllowed,
                "User alteration of password is not allowed",
            ));
        }
        let Some(addmod) = scan.addmod else {
            scan.pwmod = false;
            return Ok(());
        };

        if policy.safe_modify && scan.deladd != 2 {
            return Err(Rejection::new(
                ResultCode::InsufficientAccess,
                PasswordPolicyError::MustSupplyOldPassword,
                "Must supply old password to be changed as well as new one",
            ));
        }

        if expiry::too_young(entry, policy, self.clock.now().timestamp()) {
            return Err(Rejection::new(
                ResultCode::ConstraintViolation,
                PasswordPolicyError::PasswordTooYoung,
                "Password is too young to change",
            ));
        }

        self.verify_old_password(entry, scan, mods)?;

        let candidate = mods[addmod].values().first().cloned().unwrap_or_default();
        self.quality().check(&candidate, policy, entry).map_err(|v| {
            Rejection::new(ResultCode::ConstraintViolation, v.error, v.text())
        })?;

        if !entry.passwords.is_empty() {
            if let Err(reuse) = history::check_reuse(
                self.schemes.as_ref(),
                hist,
                policy.in_history,
                &entry.passwords,
                &candidate,
            ) {
                #[cfg(feature = "tracing")]
                tracing::debug!("password reuse refused for {}: {:?}", entry.dn, reuse);
                return Err(Rejection::new(
                    ResultCode::ConstraintViolation,
                    PasswordPolicyError::PasswordInHistory,
                    reuse.message(),
                ));
            }
        }
        Ok(())
    }

    /// Checks the old value named by the request's password delete against
    /// the stored passwords, then points the delete at the stored values.
    fn verify_old_password(
        &self,
        entry: &AccountState,
        scan: &ModScan,
        mods: &mut [Mutation],
    ) -> Result<(), Rejection> {
        let (false, Some(i)) = (entry.passwords.is_empty(), scan.delmod) else {
            return Ok(());
        };
        let supplied = mods[i].values().first().cloned().unwrap_or_default();
        if !entry.passwords.iter().any(|p| self.schemes.verify(p, &supplied)) {
            #[cfg(feature = "tracing")]
            tracing::debug!("wrong old password supplied for {}", entry.dn);
            return Err(Rejection::new(
                ResultCode::UnwillingToPerform,
                PasswordPolicyError::MustSupplyOldPassword,
                "Must supply correct old password to change to new one",
            ));
        }
        // the delete has to name the stored value, not the plaintext
        mods[i] = Mutation::DeleteValues {
            attr: Attr::Password,
            values: entry.passwords.clone(),
        };
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn change_bookkeeping(
        &self,
        ctx: &OpContext,
        target: &str,
        entry: &AccountState,
        policy: &PolicyRecord,
        hist: &[HistoryEntry],
        scan: &ModScan,
        mods: &mut Vec<Mutation>,
    ) -> Result<(), Rejection> {
        let now = format_seconds(self.clock.now().timestamp());

        if !scan.got_changed {
            if !scan.pw_delete {
                mods.push(Mutation::replace_str(Attr::ChangedTime, now.clone()));
            } else if entry.has(&Attr::ChangedTime) {
                mods.push(Mutation::Delete {
                    attr: Attr::ChangedTime,
                });
            }
        }

        for attr in [Attr::GraceUseTime, Attr::AccountLockedTime, Attr::FailureTime] {
            if entry.has(&attr) && !scan.got_del(&attr) {
                mods.push(Mutation::Delete { attr });
            }
        }

        if scan.zap_reset {
            let by_admin = ctx.password_admin
                && dn::normalize_lossy(target) != dn::normalize_lossy(&ctx.bound_dn);
            if policy.must_change && by_admin {
                mods.push(Mutation::replace_str(Attr::Reset, "TRUE"));
            } else if entry.reset {
                mods.push(Mutation::Delete { attr: Attr::Reset });
            }
        }

        if entry.has(&Attr::LastSuccess) && !scan.got_del(&Attr::LastSuccess) {
            mods.push(Mutation::Delete {
                attr: Attr::LastSuccess,
            });
        }

        if !scan.got_history {
            mods.extend(history::rotate(
                hist,
                entry.history.len(),
                policy.in_history,
                entry.password(),
                &now,
            ));
        }

        if let (true, Some(i)) = (self.config.hash_cleartext, scan.addmod) {
            if let Mutation::Add { values, .. } | Mutation::Replace { values, .. } = &mut mods[i] {
                if let Some(value) = values.first_mut() {
                    self.hash_in_place(value)?;
                }
            }
        }
        Ok(())
    }

    /// Replaces a cleartext value with its hashed form and wipes the
    /// plaintext. Values already in a known scheme are left alone.
    fn hash_in_place(&self, value: &mut Vec<u8>) -> Result<(), Rejection> {
        if scheme_of(self.schemes.as_ref(), value).is_some() {
            return Ok(());
        }
        let hashed = self.schemes.hash(value).map_err(|_e| {
            #[cfg(feature = "tracing")]
            tracing::error!("password hashing failed: {}", _e);
            Rejection::plain(ResultCode::Other, "Password hashing failed")
        })?;
        let mut plaintext = std::mem::replace(value, hashed);
        plaintext.zeroize();
        Ok(())
    }

    fn commit(&self, target: &str, mods: Vec<Mutation>) -> Result<Vec<Mutation>, Rejection> {
        self.store
            .apply_mutations(&dn::normalize_lossy(target), &mods, WriteRoute::Local)
            .map_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("modify of {} failed: {}", target, e);
                Rejection::plain(ResultCode::Other, e.to_string())
            })?;
        Ok(mods)
    }
}

/// Turns the out-of-band old password of a password modify operation into
/// a leading delete, so it is verified like a delete-then-add modify.
fn stage_old_password(req: &ModifyRequest, scan: &mut ModScan, mods: &mut Vec<Mutation>) {
    let (true, Some(old), Some(addmod)) = (req.is_exop(), req.old_password.as_ref(), scan.addmod) else {
        return;
    };
    mods.insert(
        0,
        Mutation::DeleteValues {
            attr: Attr::Password,
            values: vec![old.expose_secret().as_bytes().to_vec()],
        },
    );
    scan.delmod = Some(0);
    scan.deladd = 2;
    scan.addmod = Some(addmod + 1);
}

/// Modifies from a replication session are applied as sent, minus deletes
/// of state the entry does not carry. A password change also clears the
/// stale state the provider would have cleared.
fn replica_mods(entry: &AccountState, mods: Vec<Mutation>) -> Vec<Mutation> {
    let mut deleted: Vec<Attr> = Vec::new();
    let mut pwmod = false;
    let mut out = Vec::with_capacity(mods.len());
    for m in mods {
        let attr = m.attr().clone();
        if attr == Attr::Password {
            pwmod = true;
        }
        if matches!(m, Mutation::Delete { .. }) && STALE_ON_CHANGE.contains(&attr) {
            if !entry.has(&attr) || deleted.contains(&attr) {
                continue;
            }
            deleted.push(attr);
        }
        out.push(m);
    }
    if pwmod {
        for attr in STALE_ON_CHANGE {
            if entry.has(&attr) && !deleted.contains(&attr) {
                out.push(Mutation::Delete { attr });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_rejects_second_new_value() {
        let mods = vec![
            Mutation::add_str(Attr::Password, "a"),
            Mutation::add_str(Attr::Password, "b"),
        ];
        let err = ModScan::of(&mods).unwrap_err();
        assert_eq!(err.code, ResultCode::ConstraintViolation);
        assert_eq!(err.text, ONE_VALUE);

        let mods = vec![Mutation::Replace {
            attr: Attr::Password,
            values: vec![b"a".to_vec(), b"b".to_vec()],
        }];
        assert!(ModScan::of(&mods).is_err());
    }

    #[test]
    fn test_scan_tracks_delete_then_add() {
        let mods = vec![
            Mutation::DeleteValues {
                attr: Attr::Password,
                values: vec![b"old".to_vec()],
            },
            Mutation::add_str(Attr::Password, "new"),
            Mutation::replace_str(Attr::Reset, "TRUE"),
            Mutation::Delete {
                attr: Attr::AccountLockedTime,
            },
        ];
        let scan = ModScan::of(&mods).unwrap();
        assert!(scan.pwmod);
        assert_eq!(scan.deladd, 2);
        assert_eq!(scan.delmod, Some(0));
        assert_eq!(scan.addmod, Some(1));
        assert!(!scan.zap_reset);
        assert!(scan.pw_only);
        assert!(scan.got_del(&Attr::AccountLockedTime));
    }

    #[test]
    fn test_scan_other_attributes() {
        let mods = vec![
            Mutation::replace_str(Attr::Other("mail".into()), "a@b"),
            Mutation::Delete {
                attr: Attr::Password,
            },
        ];
        let scan = ModScan::of(&mods).unwrap();
        assert!(!scan.pw_only);
        assert!(scan.pw_delete);
        assert_eq!(scan.addmod, None);
    }

    #[test]
    fn test_replica_mods() {
        let mut entry = AccountState::new("uid=a,dc=x").with_password("pw");
        entry.failure_times = vec!["20240101000000Z".into()];
        entry.last_success = Some("20240101000000Z".into());
        let mods = vec![
            Mutation::Delete {
                attr: Attr::GraceUseTime,
            },
            Mutation::Delete {
                attr: Attr::FailureTime,
            },
            Mutation::Delete {
                attr: Attr::FailureTime,
            },
            Mutation::replace_str(Attr::Password, "new"),
        ];
        let out = replica_mods(&entry, mods);
        assert_eq!(
            out,
            vec![
                Mutation::Delete {
                    attr: Attr::FailureTime
                },
                Mutation::replace_str(Attr::Password, "new"),
                Mutation::Delete {
                    attr: Attr::LastSuccess
                },
            ]
        );
    }
}
