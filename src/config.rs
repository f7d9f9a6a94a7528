//! Engine configuration.
//!
//! Loaded from JSON:
//!
//! ```json
//! {
//!   "default_policy": "cn=default,ou=policies,dc=example",
//!   "rules": ["\"ldap:///ou=admins,dc=example??sub\" \"cn=strict,ou=policies,dc=example\""],
//!   "policies": {
//!     "cn=default,ou=policies,dc=example": { "maxAge": 7776000, "inHistory": 5 },
//!     "cn=strict,ou=policies,dc=example": { "lockout": true, "maxFailure": 3 }
//!   },
//!   "use_lockout": true,
//!   "check_module": "strength"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{PolicyError, PolicyResult};
use crate::policy::PolicyRecord;
use crate::quality::CheckModule;
use crate::rules::{PolicyRule, PolicySet};
use crate::strength::{STRENGTH_MODULE, StrengthModule};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Policy applied when no rule matches and the entry names none.
    pub default_policy: Option<String>,
    /// Ordered selection rules, `"<ldap-url>" "<policy-id>"`.
    pub rules: Vec<String>,
    pub policies: BTreeMap<String, PolicyRecord>,
    /// Hash cleartext passwords before they are stored.
    pub hash_cleartext: bool,
    /// Report `accountLocked` to clients. When off the detail is masked.
    pub use_lockout: bool,
    /// Forward state writes to the provider when the store is a replica.
    pub forward_updates: bool,
    /// Never write policy state.
    pub disable_write: bool,
    /// Send legacy expired/expiring advisories to clients that did not ask
    /// for the policy response.
    pub send_netscape_controls: bool,
    /// Name of the quality check module; only `strength` is built in.
    pub check_module: Option<String>,
    /// Identity that binds without any policy applied.
    pub root_dn: Option<String>,
    /// Stamp the time of every successful bind.
    pub track_last_success: bool,
}

impl OverlayConfig {
    pub fn from_json(text: &str) -> PolicyResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> PolicyResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        #[cfg(feature = "tracing")]
        tracing::info!("loading policy configuration from {:?}", path.as_ref());
        Self::from_json(&text)
    }

    /// Builds the policy set described by this configuration.
    ///
    /// # Errors
    ///
    /// Fails on a rule that does not parse, and on a rule or default that
    /// names a policy this configuration does not define.
    pub fn policy_set(&self) -> PolicyResult<PolicySet> {
        let mut set = PolicySet::new();
        for (id, record) in &self.policies {
            set = set.with_policy(id, record.clone())?;
        }
        for line in &self.rules {
            let rule = PolicyRule::from_config_line(line).inspect_err(|_e| {
                #[cfg(feature = "tracing")]
                tracing::error!("cannot parse policy rule {}: {}", line, _e);
            })?;
            if set.policy(rule.policy_id()).is_none() {
                return Err(PolicyError::UnknownPolicy(rule.policy_id().to_string()));
            }
            set = set.with_rule(rule);
        }
        if let Some(default) = &self.default_policy {
            if set.policy(default).is_none() {
                return Err(PolicyError::UnknownPolicy(default.clone()));
            }
            set = set.with_default(default)?;
        }
        Ok(set)
    }

    /// The configured check module, if it is one this crate provides.
    pub fn check_module(&self) -> Option<Arc<dyn CheckModule>> {
        match self.check_module.as_deref()? {
            name if name.eq_ignore_ascii_case(STRENGTH_MODULE) => Some(Arc::new(StrengthModule)),
            _other => {
                #[cfg(feature = "tracing")]
                tracing::warn!("check module {:?} is not available", _other);
                None
            }
        }
    }
}
