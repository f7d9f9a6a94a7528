//! Policy engine: per-operation orchestration of the policy components.
//!
//! The engine reads account state from an [`EntryStore`], decides the
//! outcome of an operation and writes the resulting state changes back as
//! one ordered batch. Bind-outcome processing is serialized per engine so
//! concurrent failures against one identity are all counted.

mod bind;
mod modify;


use secrecy::SecretString;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::OverlayConfig;
use crate::controls::ResponseControl;
use crate::dn;
use crate::error::{PasswordPolicyError, PolicyResult, Rejection, ResultCode};
use crate::quality::{CheckModule, QualityChecker};
use crate::rules::PolicyStore;
use crate::scheme::{DefaultSchemes, PasswordSchemes};
use crate::session::{OperationKind, SessionRestrictor};
use crate::state::{AccountState, Mutation};
use crate::store::{EntryStore, WriteRoute};
use crate::time::{Clock, SystemClock};

/// Per-request facts supplied by the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// Connection slot the request arrived on.
    pub conn: usize,
    /// Identity the connection is authenticated as; empty when anonymous.
    pub bound_dn: String,
    /// The client asked for the password policy response.
    pub policy_control: bool,
    /// The client asked for account usability information.
    pub usability_control: bool,
    /// The request arrived over a replication session.
    pub replication: bool,
    /// The requester may manage passwords of the target entry.
    pub password_admin: bool,
}

impl OpContext {
    pub fn new(conn: usize) -> Self {
        Self {
            conn,
            ..Default::default()
        }
    }

    pub fn bound_as(mut self, dn: impl Into<String>) -> Self {
        self.bound_dn = dn.into();
        self
    }

    pub fn with_policy_control(mut self) -> Self {
        self.policy_control = true;
        self
    }

    pub fn with_usability_control(mut self) -> Self {
        self.usability_control = true;
        self
    }

    pub fn from_replica(mut self) -> Self {
        self.replication = true;
        self
    }

    pub fn as_password_admin(mut self) -> Self {
        self.password_admin = true;
        self
    }
}

/// Result of a bind, or of a password compare handled like one.
#[derive(Debug, Clone, PartialEq)]
pub struct BindOutcome {
    pub code: ResultCode,
    pub error: Option<PasswordPolicyError>,
    pub warning_seconds: Option<i64>,
    pub grace_remaining: Option<i32>,
    /// State changes computed for this attempt, in write order.
    pub mutations: Vec<Mutation>,
    pub control: Option<ResponseControl>,
}

impl BindOutcome {
    fn plain(code: ResultCode) -> Self {
        Self {
            code,
            error: None,
            warning_seconds: None,
            grace_remaining: None,
            mutations: Vec::new(),
            control: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, ResultCode::Success | ResultCode::CompareTrue)
    }
}

/// A modify request against one entry.
///
/// The password modify extended operation supplies the passwords out of
/// band in `old_password`/`new_password`; `mutations` then carries the
/// replace that installs the new value.
#[derive(Debug)]
pub struct ModifyRequest {
    pub dn: String,
    pub mutations: Vec<Mutation>,
    pub old_password: Option<SecretString>,
    pub new_password: Option<SecretString>,
}

impl ModifyRequest {
    pub fn new(dn: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            dn: dn.into(),
            mutations,
            old_password: None,
            new_password: None,
        }
    }

    /// A password modify extended operation.
    pub fn password_change(dn: impl Into<String>, old: Option<&str>, new: &str) -> Self {
        Self {
            dn: dn.into(),
            mutations: vec![Mutation::replace_str(crate::state::Attr::Password, new)],
            old_password: old.map(|o| SecretString::new(o.into())),
            new_password: Some(SecretString::new(new.into())),
        }
    }

    fn is_exop(&self) -> bool {
        self.new_password.is_some()
    }
}

pub struct PolicyEngine {
    config: OverlayConfig,
    policies: Arc<PolicyStore>,
    store: Arc<dyn EntryStore>,
    schemes: Arc<dyn PasswordSchemes>,
    module: Option<Arc<dyn CheckModule>>,
    clock: Arc<dyn Clock>,
    sessions: SessionRestrictor,
    bind_lock: Mutex<()>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("policies", &self.policies)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Builds an engine from its configuration.
    ///
    /// # Errors
    ///
    /// Returns the [`PolicyError`](crate::PolicyError) raised while building
    /// the configured policy set.
    pub fn new(config: OverlayConfig, store: Arc<dyn EntryStore>) -> PolicyResult<Self> {
        let policies = Arc::new(PolicyStore::new(config.policy_set()?));
        let module = config.check_module();
        Ok(Self {
            config,
            policies,
            store,
            schemes: Arc::new(DefaultSchemes::default()),
            module,
            clock: Arc::new(SystemClock),
            sessions: SessionRestrictor::new(),
            bind_lock: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_schemes(mut self, schemes: Arc<dyn PasswordSchemes>) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn with_check_module(mut self, module: Arc<dyn CheckModule>) -> Self {
        self.module = Some(module);
        self
    }

    /// The live policy store; changes apply to operations that start later.
    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRestrictor {
        &self.sessions
    }

    /// Forgets the connection's restriction when it closes.
    pub fn connection_destroy(&self, conn: usize) {
        self.sessions.clear(conn);
    }

    /// Policy id governing `dn`, as exposed through `pwdPolicySubentry`.
    pub fn effective_policy(&self, dn: &str) -> PolicyResult<Option<String>> {
        let Some(entry) = self.store.get(&dn::normalize_lossy(dn))? else {
            return Ok(None);
        };
        Ok(self
            .policies
            .snapshot()
            .effective_policy_id(&entry)
            .map(|(id, _)| id))
    }

    /// Refuses `op` on a connection restricted to password changes.
    ///
    /// A restriction recorded for another identity is dropped instead.
    pub fn check_restriction(&self, ctx: &OpContext, op: OperationKind) -> Result<(), Rejection> {
        if self.sessions.check(ctx.conn, &ctx.bound_dn, op) {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("connection {} restricted to password changing only", ctx.conn);
        Err(restricted().with_control(ctx.policy_control))
    }

    fn quality(&self) -> QualityChecker {
        QualityChecker::new(Arc::clone(&self.schemes), self.module.clone())
    }

    fn load(&self, dn: &str) -> Option<AccountState> {
        match self.store.get(&dn::normalize_lossy(dn)) {
            Ok(entry) => entry,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("cannot read {}: {}", dn, _e);
                None
            }
        }
    }

    fn is_root(&self, dn: &str) -> bool {
        self.config
            .root_dn
            .as_deref()
            .is_some_and(|root| dn::normalize_lossy(root) == dn::normalize_lossy(dn))
    }

    fn bind_guard(&self) -> MutexGuard<'_, ()> {
        match self.bind_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Writes policy state. Failures are logged; the decision already made
    /// for the operation stands.
    fn write_state(&self, dn: &str, mutations: &[Mutation]) {
        if mutations.is_empty() || self.config.disable_write {
            return;
        }
        let route = if self.store.is_shadow() && self.config.forward_updates {
            WriteRoute::Forward
        } else {
            WriteRoute::Local
        };
        if let Err(_e) = self
            .store
            .apply_mutations(&dn::normalize_lossy(dn), mutations, route)
        {
            #[cfg(feature = "tracing")]
            tracing::error!("policy state change for {} failed: {}", dn, _e);
        }
    }
}

fn restricted() -> Rejection {
    Rejection::new(
        ResultCode::InsufficientAccess,
        PasswordPolicyError::ChangeAfterReset,
        "Operations are restricted to bind/unbind/abandon/StartTLS/modify password",
    )
}
