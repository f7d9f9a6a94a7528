//! Policy selection rules and the policy store.
//!
//! A rule is written as `"<ldap-url>" "<policy-id>"`, e.g.
//! `"ldap:///ou=people,dc=example,dc=com??sub?(objectClass=person)" "cn=strict,ou=policies"`.
//! Rules are ordered; the first one whose scope and filter match an entry
//! selects its policy.

use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::dn::{self, Scope};
use crate::error::{PolicyError, PolicyResult};
use crate::filter::Filter;
use crate::policy::PolicyRecord;
use crate::state::AccountState;

/// One selection rule.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    uri: String,
    base: String,
    scope: Scope,
    filter: Option<Filter>,
    policy_id: String,
}

impl PolicyRule {
    /// Parses a rule from its URL and target policy identifier.
    ///
    /// # Errors
    ///
    /// [`PolicyError::BadUrl`] for a malformed URL or scope,
    /// [`PolicyError::BadDn`] for a bad base or policy DN and
    /// [`PolicyError::BadFilter`] for a filter that does not parse.
    pub fn parse(uri: &str, policy_id: &str) -> PolicyResult<Self> {
        let uri = uri.trim();
        let rest = strip_scheme(uri).ok_or_else(|| PolicyError::BadUrl(uri.to_string()))?;
        // host[:port] is accepted and ignored
        let path = match rest.find('/') {
            Some(i) => &rest[i + 1..],
            None => "",
        };
        let parts: Vec<&str> = path.split('?').collect();
        if parts.len() > 5 {
            return Err(PolicyError::BadUrl(uri.to_string()));
        }
        let field = |i: usize| -> PolicyResult<String> {
            let raw = parts.get(i).copied().unwrap_or("");
            percent_decode_str(raw)
                .decode_utf8()
                .map(|s| s.into_owned())
                .map_err(|_| PolicyError::BadUrl(uri.to_string()))
        };

        let base = dn::normalize(&field(0)?)?;
        let scope = Scope::parse(&field(2)?)?;
        let filter_text = field(3)?;
        let filter = if filter_text.trim().is_empty() {
            None
        } else {
            Some(Filter::parse(&filter_text)?)
        };
        if let Some(ext) = parts.get(4) {
            if ext.split(',').any(|e| e.trim_start().starts_with('!')) {
                return Err(PolicyError::BadUrl(format!(
                    "unsupported critical extension in {uri}"
                )));
            }
        }

        let policy_id = dn::normalize(policy_id)?;
        if policy_id.is_empty() {
            return Err(PolicyError::BadRule(format!("empty policy reference for {uri}")));
        }

        Ok(Self {
            uri: uri.to_string(),
            base,
            scope,
            filter,
            policy_id,
        })
    }

    /// Parses a configuration line: two double-quoted values separated by
    /// whitespace.
    pub fn from_config_line(line: &str) -> PolicyResult<Self> {
        let values = quoted_values(line)?;
        match values.as_slice() {
            [uri, policy] => Self::parse(uri, policy),
            _ => Err(PolicyError::BadRule(line.to_string())),
        }
    }

    /// The rule in configuration syntax.
    pub fn to_config_line(&self) -> String {
        format!("\"{}\" \"{}\"", self.uri, self.policy_id)
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// `ndn` must already be normalized.
    pub fn matches(&self, ndn: &str, entry: &AccountState) -> bool {
        dn::in_scope(ndn, &self.base, self.scope)
            && self.filter.as_ref().is_none_or(|f| f.matches(entry))
    }
}

fn strip_scheme(uri: &str) -> Option<&str> {
    let lower = uri.get(..7)?.to_ascii_lowercase();
    if lower == "ldap://" {
        return uri.get(7..);
    }
    let lower = uri.get(..8)?.to_ascii_lowercase();
    if lower == "ldaps://" || lower == "ldapi://" {
        return uri.get(8..);
    }
    None
}

fn quoted_values(line: &str) -> PolicyResult<Vec<String>> {
    let mut out = Vec::new();
    let mut chars = line.trim().chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if c != '"' {
            return Err(PolicyError::BadRule(line.to_string()));
        }
        let mut value = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        value.push(next);
                    }
                }
                '"' => {
                    closed = true;
                    break;
                }
                other => value.push(other),
            }
        }
        if !closed {
            return Err(PolicyError::BadRule(line.to_string()));
        }
        out.push(value);
    }
    Ok(out)
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// The entry's own policy reference.
    Entry,
    /// Rule at this position.
    Rule(usize),
    /// The configured default policy.
    Default,
    /// No usable policy: the built-in permissive one.
    BuiltIn,
}

/// Result of policy resolution for one entry.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub id: Option<String>,
    pub record: Arc<PolicyRecord>,
    pub source: PolicySource,
}

impl ResolvedPolicy {
    fn built_in() -> Self {
        Self {
            id: None,
            record: Arc::new(PolicyRecord::default()),
            source: PolicySource::BuiltIn,
        }
    }

    pub fn is_built_in(&self) -> bool {
        self.source == PolicySource::BuiltIn
    }
}

/// Immutable snapshot of rules, policies and the default policy.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    rules: Vec<PolicyRule>,
    policies: BTreeMap<String, Arc<PolicyRecord>>,
    default_policy: Option<String>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a policy record under a normalized id.
    pub fn with_policy(mut self, id: &str, record: PolicyRecord) -> PolicyResult<Self> {
        self.policies
            .insert(dn::normalize(id)?, Arc::new(record.normalized()));
        Ok(self)
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_default(mut self, id: &str) -> PolicyResult<Self> {
        self.default_policy = Some(dn::normalize(id)?);
        Ok(self)
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn default_policy(&self) -> Option<&str> {
        self.default_policy.as_deref()
    }

    pub fn policy(&self, id: &str) -> Option<Arc<PolicyRecord>> {
        self.policies.get(&dn::normalize_lossy(id)).cloned()
    }

    /// Policy id an entry is governed by: its own reference, else the first
    /// matching rule, else the default.
    pub fn effective_policy_id(&self, entry: &AccountState) -> Option<(String, PolicySource)> {
        if let Some(r) = entry.policy_ref.as_deref().filter(|r| !r.trim().is_empty()) {
            return Some((dn::normalize_lossy(r), PolicySource::Entry));
        }
        let ndn = dn::normalize_lossy(&entry.dn);
        if let Some((i, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(&ndn, entry))
        {
            return Some((rule.policy_id.clone(), PolicySource::Rule(i)));
        }
        self.default_policy
            .clone()
            .map(|id| (id, PolicySource::Default))
    }

    pub fn resolve(&self, entry: &AccountState) -> ResolvedPolicy {
        if let Some((id, source)) = self.effective_policy_id(entry) {
            if let Some(record) = self.policy(&id) {
                return ResolvedPolicy {
                    id: Some(id),
                    record,
                    source,
                };
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "policy {} for {} not found, falling back to the default policy",
                id,
                entry.dn
            );
            if source != PolicySource::Default {
                if let Some(default) = &self.default_policy {
                    if let Some(record) = self.policy(default) {
                        return ResolvedPolicy {
                            id: Some(default.clone()),
                            record,
                            source: PolicySource::Default,
                        };
                    }
                }
            }
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("using built-in policy for {}", entry.dn);
        ResolvedPolicy::built_in()
    }
}

/// Read-mostly holder of the active [`PolicySet`].
///
/// Readers take a snapshot and keep evaluating against it; every change
/// publishes a new snapshot under the write lock.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySet>>,
}

impl PolicyStore {
    pub fn new(set: PolicySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replaces the whole set.
    pub fn replace(&self, set: PolicySet) {
        let _ = self.update(|current| {
            *current = set;
            Ok(())
        });
        #[cfg(feature = "tracing")]
        tracing::info!("policy configuration reloaded");
    }

    fn update<F>(&self, f: F) -> PolicyResult<()>
    where
        F: FnOnce(&mut PolicySet) -> PolicyResult<()>,
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = PolicySet::clone(&guard);
        f(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn resolve(&self, entry: &AccountState) -> ResolvedPolicy {
        self.snapshot().resolve(entry)
    }

    /// Inserts a rule before `position`, or appends when `None`.
    ///
    /// # Errors
    ///
    /// [`PolicyError::RulePosition`] when `position` is past the end.
    pub fn insert_rule(&self, position: Option<usize>, rule: PolicyRule) -> PolicyResult<()> {
        self.update(|set| {
            let at = position.unwrap_or(set.rules.len());
            if at > set.rules.len() {
                return Err(PolicyError::RulePosition(at));
            }
            set.rules.insert(at, rule);
            Ok(())
        })
    }

    /// Removes the rule at `position`, or every rule when `None`.
    pub fn remove_rule(&self, position: Option<usize>) -> PolicyResult<()> {
        self.update(|set| match position {
            None => {
                set.rules.clear();
                Ok(())
            }
            Some(i) if i < set.rules.len() => {
                set.rules.remove(i);
                Ok(())
            }
            Some(i) => Err(PolicyError::RulePosition(i)),
        })
    }

    pub fn set_policy(&self, id: &str, record: PolicyRecord) -> PolicyResult<()> {
        let id = dn::normalize(id)?;
        self.update(|set| {
            set.policies.insert(id, Arc::new(record.normalized()));
            Ok(())
        })
    }

    /// Loads a policy from its entry attributes.
    pub fn load_policy_entry(&self, id: &str, attrs: &BTreeMap<String, Vec<String>>) -> PolicyResult<()> {
        let record = PolicyRecord::from_attributes(attrs)?;
        self.set_policy(id, record)
    }

    pub fn remove_policy(&self, id: &str) -> bool {
        let id = dn::normalize_lossy(id);
        let mut removed = false;
        let _ = self.update(|set| {
            removed = set.policies.remove(&id).is_some();
            Ok(())
        });
        removed
    }

    pub fn set_default(&self, id: Option<&str>) -> PolicyResult<()> {
        let id = id.map(dn::normalize).transpose()?;
        self.update(|set| {
            set.default_policy = id;
            Ok(())
        })
    }

    /// Rules in configuration syntax, in order.
    pub fn rule_lines(&self) -> Vec<String> {
        self.snapshot()
            .rules
            .iter()
            .map(PolicyRule::to_config_line)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountState {
        AccountState::new("uid=alice,ou=people,dc=example,dc=com")
            .with_attribute("objectClass", "person")
    }

    fn strict() -> PolicyRecord {
        PolicyRecord {
            max_failure: 3,
            lockout: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_rule_url() {
        let rule = PolicyRule::parse(
            "ldap:///ou=People,dc=example,dc=com??sub?(objectClass=person)",
            "cn=Strict,ou=Policies",
        )
        .unwrap();
        assert_eq!(rule.scope(), Scope::Sub);
        assert_eq!(rule.policy_id(), "cn=strict,ou=policies");
        assert!(rule.matches("uid=alice,ou=people,dc=example,dc=com", &alice()));
    }

    #[test]
    fn test_default_scope_is_base_and_percent_decoding() {
        let rule = PolicyRule::parse("ldap:///ou=people%2Cdc=example%2Cdc=com", "cn=p").unwrap();
        assert_eq!(rule.scope(), Scope::Base);
        assert!(rule.matches("ou=people,dc=example,dc=com", &alice()));
        assert!(!rule.matches("uid=alice,ou=people,dc=example,dc=com", &alice()));
    }

    #[test]
    fn test_bad_rules_rejected_at_load() {
        assert!(matches!(
            PolicyRule::parse("http://x/dc=com", "cn=p"),
            Err(PolicyError::BadUrl(_))
        ));
        assert!(matches!(
            PolicyRule::parse("ldap:///dc=com??bogus", "cn=p"),
            Err(PolicyError::BadUrl(_))
        ));
        assert!(matches!(
            PolicyRule::parse("ldap:///dc=com??sub?(cn=x", "cn=p"),
            Err(PolicyError::BadFilter(_))
        ));
        assert!(PolicyRule::parse("ldap:///dc=com??sub", "").is_err());
        assert!(PolicyRule::from_config_line("\"ldap:///dc=com\"").is_err());
    }

    #[test]
    fn test_config_line_round_trip() {
        let line = "\"ldap:///dc=example,dc=com??sub?(objectClass=person)\" \"cn=default,ou=policies\"";
        let rule = PolicyRule::from_config_line(line).unwrap();
        assert_eq!(rule.to_config_line(), line);
    }

    #[test]
    fn test_resolution_order() {
        let set = PolicySet::new()
            .with_policy("cn=strict", strict())
            .unwrap()
            .with_policy("cn=default", PolicyRecord::default())
            .unwrap()
            .with_policy("cn=own", PolicyRecord { in_history: 4, ..Default::default() })
            .unwrap()
            .with_rule(PolicyRule::parse("ldap:///dc=example,dc=com??sub?(objectClass=person)", "cn=strict").unwrap())
            .with_default("cn=default")
            .unwrap();

        let r = set.resolve(&alice());
        assert_eq!(r.source, PolicySource::Rule(0));
        assert_eq!(r.record.max_failure, 3);

        let mut own = alice();
        own.policy_ref = Some("CN=Own".into());
        let r = set.resolve(&own);
        assert_eq!(r.source, PolicySource::Entry);
        assert_eq!(r.record.in_history, 4);

        let r = set.resolve(&AccountState::new("uid=bob,dc=other"));
        assert_eq!(r.source, PolicySource::Default);
        assert_eq!(r.id.as_deref(), Some("cn=default"));
    }

    #[test]
    fn test_missing_policy_falls_back() {
        let set = PolicySet::new()
            .with_rule(PolicyRule::parse("ldap:///dc=example,dc=com??sub", "cn=missing").unwrap())
            .with_policy("cn=default", PolicyRecord { min_length: 8, ..Default::default() })
            .unwrap()
            .with_default("cn=default")
            .unwrap();
        let r = set.resolve(&alice());
        assert_eq!(r.source, PolicySource::Default);
        assert_eq!(r.record.min_length, 8);

        let bare = PolicySet::new()
            .with_rule(PolicyRule::parse("ldap:///dc=example,dc=com??sub", "cn=missing").unwrap());
        let r = bare.resolve(&alice());
        assert!(r.is_built_in());
        assert!(r.record.allow_user_change);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let set = PolicySet::new()
            .with_policy("cn=strict", strict())
            .unwrap()
            .with_rule(PolicyRule::parse("ldap:///dc=example,dc=com??sub", "cn=strict").unwrap());
        let a = set.resolve(&alice());
        let b = set.resolve(&alice());
        assert_eq!(a.id, b.id);
        assert_eq!(*a.record, *b.record);
    }

    #[test]
    fn test_store_rule_positions() {
        let store = PolicyStore::new(PolicySet::new());
        let r = |id: &str| PolicyRule::parse("ldap:///dc=com??sub", id).unwrap();
        store.insert_rule(None, r("cn=a")).unwrap();
        store.insert_rule(None, r("cn=c")).unwrap();
        store.insert_rule(Some(1), r("cn=b")).unwrap();
        assert!(matches!(
            store.insert_rule(Some(9), r("cn=z")),
            Err(PolicyError::RulePosition(9))
        ));
        let lines = store.rule_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("\"cn=b\""));

        store.remove_rule(Some(0)).unwrap();
        assert!(store.rule_lines()[0].ends_with("\"cn=b\""));
        store.remove_rule(None).unwrap();
        assert!(store.rule_lines().is_empty());
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let store = PolicyStore::new(PolicySet::new().with_policy("cn=p", strict()).unwrap());
        let before = store.snapshot();
        store.replace(PolicySet::new());
        assert!(before.policy("cn=p").is_some());
        assert!(store.snapshot().policy("cn=p").is_none());
    }

    #[test]
    fn test_load_policy_entry_validates() {
        let store = PolicyStore::default();
        let mut attrs = BTreeMap::new();
        attrs.insert("pwdMaxFailure".to_string(), vec!["x".to_string()]);
        assert!(store.load_policy_entry("cn=p", &attrs).is_err());
        attrs.insert("pwdMaxFailure".to_string(), vec!["2".to_string()]);
        store.load_policy_entry("cn=p", &attrs).unwrap();
        assert_eq!(store.snapshot().policy("CN=P").unwrap().max_recorded_failure, 2);
        assert!(store.remove_policy("cn=p"));
    }
}
