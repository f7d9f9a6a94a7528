//! Per-identity policy state and the mutations the engine emits against it.

use std::collections::BTreeMap;
use std::fmt;

/// Attributes the engine reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attr {
    Password,
    ChangedTime,
    AccountLockedTime,
    TmpLockoutEnd,
    StartTime,
    EndTime,
    LastSuccess,
    FailureTime,
    GraceUseTime,
    Reset,
    History,
    PolicySubentry,
    /// Any attribute the policy does not manage, by lowercased name.
    Other(String),
}

impl Attr {
    pub fn from_name(name: &str) -> Attr {
        match name.to_ascii_lowercase().as_str() {
            "userpassword" => Attr::Password,
            "pwdchangedtime" => Attr::ChangedTime,
            "pwdaccountlockedtime" => Attr::AccountLockedTime,
            "pwdaccounttmplockoutend" => Attr::TmpLockoutEnd,
            "pwdstarttime" => Attr::StartTime,
            "pwdendtime" => Attr::EndTime,
            "pwdlastsuccess" => Attr::LastSuccess,
            "pwdfailuretime" => Attr::FailureTime,
            "pwdgraceusetime" => Attr::GraceUseTime,
            "pwdreset" => Attr::Reset,
            "pwdhistory" => Attr::History,
            "pwdpolicysubentry" => Attr::PolicySubentry,
            other => Attr::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Attr::Password => "userPassword",
            Attr::ChangedTime => "pwdChangedTime",
            Attr::AccountLockedTime => "pwdAccountLockedTime",
            Attr::TmpLockoutEnd => "pwdAccountTmpLockoutEnd",
            Attr::StartTime => "pwdStartTime",
            Attr::EndTime => "pwdEndTime",
            Attr::LastSuccess => "pwdLastSuccess",
            Attr::FailureTime => "pwdFailureTime",
            Attr::GraceUseTime => "pwdGraceUseTime",
            Attr::Reset => "pwdReset",
            Attr::History => "pwdHistory",
            Attr::PolicySubentry => "pwdPolicySubentry",
            Attr::Other(name) => name,
        }
    }

    /// Operational attributes do not make a modify "more than a password change".
    pub fn is_operational(&self) -> bool {
        !matches!(self, Attr::Password | Attr::Other(_))
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One change to an entry. Lists of mutations are applied in order.
#[derive(Clone, PartialEq, Eq)]
pub enum Mutation {
    Replace { attr: Attr, values: Vec<Vec<u8>> },
    Add { attr: Attr, values: Vec<Vec<u8>> },
    Delete { attr: Attr },
    DeleteValues { attr: Attr, values: Vec<Vec<u8>> },
}

impl Mutation {
    pub fn replace_str(attr: Attr, value: impl Into<String>) -> Self {
        Mutation::Replace {
            attr,
            values: vec![value.into().into_bytes()],
        }
    }

    pub fn add_str(attr: Attr, value: impl Into<String>) -> Self {
        Mutation::Add {
            attr,
            values: vec![value.into().into_bytes()],
        }
    }

    pub fn attr(&self) -> &Attr {
        match self {
            Mutation::Replace { attr, .. }
            | Mutation::Add { attr, .. }
            | Mutation::Delete { attr }
            | Mutation::DeleteValues { attr, .. } => attr,
        }
    }

    pub fn values(&self) -> &[Vec<u8>] {
        match self {
            Mutation::Replace { values, .. }
            | Mutation::Add { values, .. }
            | Mutation::DeleteValues { values, .. } => values,
            Mutation::Delete { .. } => &[],
        }
    }

    /// Delete of the whole attribute, or of specific values.
    pub fn is_delete(&self) -> bool {
        matches!(self, Mutation::Delete { .. } | Mutation::DeleteValues { .. })
    }
}

// Password values never show up in debug output.
impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (op, attr) = match self {
            Mutation::Replace { attr, .. } => ("replace", attr),
            Mutation::Add { attr, .. } => ("add", attr),
            Mutation::Delete { attr } => ("delete", attr),
            Mutation::DeleteValues { attr, .. } => ("delete-values", attr),
        };
        let mut d = f.debug_struct(op);
        d.field("attr", &attr.name());
        if matches!(attr, Attr::Password | Attr::History) {
            d.field("values", &self.values().len());
        } else {
            let shown: Vec<_> = self
                .values()
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect();
            d.field("values", &shown);
        }
        d.finish()
    }
}

/// Stored policy state of one identity, as read from the entry store.
///
/// Timestamps stay in their stored textual form so that malformed values
/// reach the evaluators, which decide per check whether to fail closed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub dn: String,
    pub passwords: Vec<Vec<u8>>,
    pub changed_time: Option<String>,
    pub account_locked_time: Option<String>,
    pub tmp_lockout_end: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub last_success: Option<String>,
    pub failure_times: Vec<String>,
    pub grace_use_times: Vec<String>,
    pub reset: bool,
    pub history: Vec<Vec<u8>>,
    pub policy_ref: Option<String>,
    /// Unmanaged attributes, keyed by lowercased name; used by rule filters.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl fmt::Debug for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountState")
            .field("dn", &self.dn)
            .field("passwords", &self.passwords.len())
            .field("changed_time", &self.changed_time)
            .field("account_locked_time", &self.account_locked_time)
            .field("tmp_lockout_end", &self.tmp_lockout_end)
            .field("failure_times", &self.failure_times)
            .field("grace_use_times", &self.grace_use_times)
            .field("reset", &self.reset)
            .field("history", &self.history.len())
            .field("policy_ref", &self.policy_ref)
            .finish_non_exhaustive()
    }
}

impl AccountState {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.passwords = vec![password.into()];
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn password(&self) -> Option<&[u8]> {
        self.passwords.first().map(Vec::as_slice)
    }

    pub fn has(&self, attr: &Attr) -> bool {
        match attr {
            Attr::Password => !self.passwords.is_empty(),
            Attr::ChangedTime => self.changed_time.is_some(),
            Attr::AccountLockedTime => self.account_locked_time.is_some(),
            Attr::TmpLockoutEnd => self.tmp_lockout_end.is_some(),
            Attr::StartTime => self.start_time.is_some(),
            Attr::EndTime => self.end_time.is_some(),
            Attr::LastSuccess => self.last_success.is_some(),
            Attr::FailureTime => !self.failure_times.is_empty(),
            Attr::GraceUseTime => !self.grace_use_times.is_empty(),
            Attr::Reset => self.reset,
            Attr::History => !self.history.is_empty(),
            Attr::PolicySubentry => self.policy_ref.is_some(),
            Attr::Other(name) => self.attributes.contains_key(name),
        }
    }

    /// Textual values of an attribute, managed or not, for filter matching.
    pub fn values_of(&self, name: &str) -> Vec<String> {
        let one = |v: &Option<String>| v.iter().cloned().collect::<Vec<_>>();
        match Attr::from_name(name) {
            Attr::Password | Attr::History => Vec::new(),
            Attr::ChangedTime => one(&self.changed_time),
            Attr::AccountLockedTime => one(&self.account_locked_time),
            Attr::TmpLockoutEnd => one(&self.tmp_lockout_end),
            Attr::StartTime => one(&self.start_time),
            Attr::EndTime => one(&self.end_time),
            Attr::LastSuccess => one(&self.last_success),
            Attr::FailureTime => self.failure_times.clone(),
            Attr::GraceUseTime => self.grace_use_times.clone(),
            Attr::Reset if self.reset => vec!["TRUE".to_string()],
            Attr::Reset => Vec::new(),
            Attr::PolicySubentry => one(&self.policy_ref),
            Attr::Other(n) => self.attributes.get(&n).cloned().unwrap_or_default(),
        }
    }

    /// Applies mutations in order. Deleting specific values that are not
    /// present is ignored, as is deleting an absent attribute.
    pub fn apply(&mut self, mutations: &[Mutation]) {
        for m in mutations {
            match m {
                Mutation::Replace { attr, values } => {
                    self.clear(attr);
                    self.push_values(attr, values);
                }
                Mutation::Add { attr, values } => self.push_values(attr, values),
                Mutation::Delete { attr } => self.clear(attr),
                Mutation::DeleteValues { attr, values } => self.remove_values(attr, values),
            }
        }
    }

    fn clear(&mut self, attr: &Attr) {
        match attr {
            Attr::Password => self.passwords.clear(),
            Attr::ChangedTime => self.changed_time = None,
            Attr::AccountLockedTime => self.account_locked_time = None,
            Attr::TmpLockoutEnd => self.tmp_lockout_end = None,
            Attr::StartTime => self.start_time = None,
            Attr::EndTime => self.end_time = None,
            Attr::LastSuccess => self.last_success = None,
            Attr::FailureTime => self.failure_times.clear(),
            Attr::GraceUseTime => self.grace_use_times.clear(),
            Attr::Reset => self.reset = false,
            Attr::History => self.history.clear(),
            Attr::PolicySubentry => self.policy_ref = None,
            Attr::Other(name) => {
                self.attributes.remove(name);
            }
        }
    }

    fn push_values(&mut self, attr: &Attr, values: &[Vec<u8>]) {
        let text = |v: &Vec<u8>| String::from_utf8_lossy(v).into_owned();
        for v in values {
            match attr {
                Attr::Password => self.passwords.push(v.clone()),
                Attr::History => self.history.push(v.clone()),
                Attr::ChangedTime => self.changed_time = Some(text(v)),
                Attr::AccountLockedTime => self.account_locked_time = Some(text(v)),
                Attr::TmpLockoutEnd => self.tmp_lockout_end = Some(text(v)),
                Attr::StartTime => self.start_time = Some(text(v)),
                Attr::EndTime => self.end_time = Some(text(v)),
                Attr::LastSuccess => self.last_success = Some(text(v)),
                Attr::FailureTime => self.failure_times.push(text(v)),
                Attr::GraceUseTime => self.grace_use_times.push(text(v)),
                Attr::Reset => self.reset = text(v).eq_ignore_ascii_case("TRUE"),
                Attr::PolicySubentry => self.policy_ref = Some(text(v)),
                Attr::Other(name) => self
                    .attributes
                    .entry(name.clone())
                    .or_default()
                    .push(text(v)),
            }
        }
    }

    fn remove_values(&mut self, attr: &Attr, values: &[Vec<u8>]) {
        let matches_text = |s: &String| values.iter().any(|v| v.as_slice() == s.as_bytes());
        let drop_single = |slot: &mut Option<String>| {
            if slot.as_ref().is_some_and(|s| matches_text(s)) {
                *slot = None;
            }
        };
        match attr {
            Attr::Password => self.passwords.retain(|p| !values.contains(p)),
            Attr::History => self.history.retain(|h| !values.contains(h)),
            Attr::FailureTime => self.failure_times.retain(|s| !matches_text(s)),
            Attr::GraceUseTime => self.grace_use_times.retain(|s| !matches_text(s)),
            Attr::ChangedTime => drop_single(&mut self.changed_time),
            Attr::AccountLockedTime => drop_single(&mut self.account_locked_time),
            Attr::TmpLockoutEnd => drop_single(&mut self.tmp_lockout_end),
            Attr::StartTime => drop_single(&mut self.start_time),
            Attr::EndTime => drop_single(&mut self.end_time),
            Attr::LastSuccess => drop_single(&mut self.last_success),
            Attr::PolicySubentry => drop_single(&mut self.policy_ref),
            Attr::Reset => self.reset = false,
            Attr::Other(name) => {
                if let Some(vals) = self.attributes.get_mut(name) {
                    vals.retain(|s| !matches_text(s));
                    if vals.is_empty() {
                        self.attributes.remove(name);
                    }
                }
            }
        }
    }
}
