//! Candidate password quality checks.
//!
//! Length limits are enforced here; anything beyond that is delegated to a
//! pluggable [`CheckModule`]. Module calls are serialized process-wide,
//! so a module does not need to be reentrant.

use secrecy::SecretString;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[cfg(feature = "async")]
use secrecy::ExposeSecret;

#[cfg(feature = "async")]
use tokio::sync::mpsc;

#[cfg(feature = "async")]
use tokio_util::sync::CancellationToken;

use crate::error::PasswordPolicyError;
use crate::policy::{CheckQuality, PolicyRecord};
use crate::scheme::{PasswordSchemes, checkable_plaintext};
use crate::state::AccountState;

static MODULE_LOCK: Mutex<()> = Mutex::new(());

/// Refusal reported by a check module. The message may reach the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CheckFailure(pub String);

/// External quality check.
///
/// # Arguments
///
/// * `password` - The plaintext candidate, without any scheme prefix
/// * `entry` - The entry whose password is being set
/// * `arg` - The policy's module argument, if any
pub trait CheckModule: Send + Sync {
    fn check(&self, password: &SecretString, entry: &AccountState, arg: Option<&str>) -> Result<(), CheckFailure>;
}

/// Why a candidate was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct QualityViolation {
    pub error: PasswordPolicyError,
    /// Module supplied detail.
    pub message: Option<String>,
}

impl QualityViolation {
    fn of(error: PasswordPolicyError) -> Self {
        Self {
            error,
            message: None,
        }
    }

    /// Diagnostic text for the refused operation.
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or("Password fails quality checking policy")
    }
}

pub struct QualityChecker {
    schemes: Arc<dyn PasswordSchemes>,
    module: Option<Arc<dyn CheckModule>>,
}

impl std::fmt::Debug for QualityChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityChecker")
            .field("module", &self.module.is_some())
            .finish()
    }
}

impl QualityChecker {
    pub fn new(schemes: Arc<dyn PasswordSchemes>, module: Option<Arc<dyn CheckModule>>) -> Self {
        Self { schemes, module }
    }

    /// Checks `candidate` against `policy`. Accepts everything when the
    /// policy does not ask for quality checks.
    ///
    /// Lengths are counted in bytes of the value as supplied. A value
    /// encoded in a scheme other than `{CLEARTEXT}` cannot be inspected:
    /// it is refused under a mandatory policy and accepted otherwise.
    ///
    /// # Errors
    ///
    /// A [`QualityViolation`] naming the first failed check.
    pub fn check(&self, candidate: &[u8], policy: &PolicyRecord, entry: &AccountState) -> Result<(), QualityViolation> {
        if !policy.check_quality.enabled() {
            return Ok(());
        }
        if candidate.is_empty() || candidate.len() < policy.min_length as usize {
            return Err(QualityViolation::of(PasswordPolicyError::PasswordTooShort));
        }
        if policy.max_length > 0 && candidate.len() > policy.max_length as usize {
            return Err(QualityViolation::of(PasswordPolicyError::PasswordTooLong));
        }

        let Some(plain) = checkable_plaintext(self.schemes.as_ref(), candidate) else {
            if policy.check_quality == CheckQuality::Mandatory {
                return Err(QualityViolation::of(
                    PasswordPolicyError::InsufficientPasswordQuality,
                ));
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("password for {} is pre-hashed, not checked", entry.dn);
            return Ok(());
        };

        if !policy.use_check_module {
            return Ok(());
        }
        let Some(module) = &self.module else {
            #[cfg(feature = "tracing")]
            tracing::warn!("policy asks for a check module but none is loaded");
            return Err(QualityViolation::of(
                PasswordPolicyError::InsufficientPasswordQuality,
            ));
        };
        let Ok(text) = std::str::from_utf8(plain) else {
            return Err(QualityViolation {
                error: PasswordPolicyError::InsufficientPasswordQuality,
                message: Some("Password is not valid UTF-8".to_string()),
            });
        };
        let password = SecretString::new(text.into());

        let result = {
            let _guard = match MODULE_LOCK.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            module.check(&password, entry, policy.check_module_arg.as_deref())
        };
        result.map_err(|failure| {
            #[cfg(feature = "tracing")]
            tracing::warn!("check module refused password for {}: {}", entry.dn, failure);
            QualityViolation {
                error: PasswordPolicyError::InsufficientPasswordQuality,
                message: Some(failure.0),
            }
        })
    }
}

/// Outcome delivered by [`check_password_quality_tx`].
#[cfg(feature = "async")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityVerdict {
    Accepted,
    Rejected(QualityViolation),
    Cancelled,
}

/// Runs a quality check on the blocking pool and sends the verdict via channel.
///
/// Cancelling `token` stops waiting for the check; a module call already in
/// progress runs to completion in the background.
#[cfg(feature = "async")]
pub async fn check_password_quality_tx(
    checker: Arc<QualityChecker>,
    candidate: SecretString,
    policy: Arc<PolicyRecord>,
    entry: AccountState,
    token: CancellationToken,
    tx: mpsc::Sender<QualityVerdict>,
) {
    #[cfg(feature = "tracing")]
    tracing::info!("quality check for {} is about to start...", entry.dn);

    let verdict = if token.is_cancelled() {
        QualityVerdict::Cancelled
    } else {
        let task = tokio::task::spawn_blocking(move || {
            checker.check(candidate.expose_secret().as_bytes(), &policy, &entry)
        });
        tokio::select! {
            _ = token.cancelled() => QualityVerdict::Cancelled,
            joined = task => match joined {
                Ok(Ok(())) => QualityVerdict::Accepted,
                Ok(Err(violation)) => QualityVerdict::Rejected(violation),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("quality check task failed: {}", _e);
                    QualityVerdict::Rejected(QualityViolation::of(
                        PasswordPolicyError::InsufficientPasswordQuality,
                    ))
                }
            },
        }
    };

    if let Err(e) = tx.send(verdict).await {
        #[cfg(feature = "tracing")]
        tracing::error!("Failed to send quality verdict: {}", e);
    }
}


#[cfg(all(test, feature = "async"))]
mod async_tests {
    use super::*;
    use crate::scheme::DefaultSchemes;

    fn checker() -> Arc<QualityChecker> {
        Arc::new(QualityChecker::new(Arc::new(DefaultSchemes::default()), None))
    }

    fn policy() -> Arc<PolicyRecord> {
        Arc::new(PolicyRecord {
            check_quality: CheckQuality::Mandatory,
            min_length: 8,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_check_password_quality_tx() {
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let pwd = SecretString::new("short".to_string().into());

        check_password_quality_tx(checker(), pwd, policy(), AccountState::new("uid=a"), token, tx).await;

        let verdict = rx.recv().await.expect("Should receive verdict");
        assert!(matches!(
            verdict,
            QualityVerdict::Rejected(QualityViolation {
                error: PasswordPolicyError::PasswordTooShort,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_check_password_quality_tx_accepts() {
        let (tx, mut rx) = mpsc::channel(1);
        let pwd = SecretString::new("long enough".to_string().into());
        check_password_quality_tx(
            checker(),
            pwd,
            policy(),
            AccountState::new("uid=a"),
            CancellationToken::new(),
            tx,
        )
        .await;
        assert_eq!(rx.recv().await, Some(QualityVerdict::Accepted));
    }

    #[tokio::test]
    async fn test_check_with_cancellation() {
        let (tx, mut rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();
        let pwd = SecretString::new("long enough".to_string().into());
        check_password_quality_tx(checker(), pwd, policy(), AccountState::new("uid=a"), token, tx).await;
        assert_eq!(rx.recv().await, Some(QualityVerdict::Cancelled));
    }
}
