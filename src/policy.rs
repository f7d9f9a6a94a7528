//! Parameterized password policy records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PolicyError, PolicyResult};

/// Failure stamps kept when a delay is configured without a recording limit.
pub const DEFAULT_MAX_RECORDED_FAILURE: u32 = 5;

/// How strictly candidate passwords are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckQuality {
    #[default]
    Off,
    /// Check when possible; accept values that cannot be checked.
    Advisory,
    /// Reject values that cannot be checked.
    Mandatory,
}

impl CheckQuality {
    fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(CheckQuality::Off),
            1 => Some(CheckQuality::Advisory),
            2 => Some(CheckQuality::Mandatory),
            _ => None,
        }
    }

    pub fn enabled(self) -> bool {
        self != CheckQuality::Off
    }
}

/// One password policy. Durations are in seconds; zero disables a limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyRecord {
    pub min_age: u32,
    pub max_age: u32,
    pub max_idle: u32,
    pub in_history: u32,
    pub check_quality: CheckQuality,
    pub min_length: u32,
    pub max_length: u32,
    pub expire_warning: u32,
    pub grace_expiry: u32,
    pub grace_authn_limit: u32,
    pub lockout: bool,
    pub lockout_duration: u32,
    pub min_delay: u32,
    pub max_delay: u32,
    pub max_failure: u32,
    pub max_recorded_failure: u32,
    pub failure_count_interval: u32,
    pub must_change: bool,
    pub allow_user_change: bool,
    pub safe_modify: bool,
    pub use_check_module: bool,
    pub check_module_arg: Option<String>,
}

impl Default for PolicyRecord {
    /// The built-in permissive policy: no aging, no history, no lockout,
    /// users may change their own password.
    fn default() -> Self {
        Self {
            min_age: 0,
            max_age: 0,
            max_idle: 0,
            in_history: 0,
            check_quality: CheckQuality::Off,
            min_length: 0,
            max_length: 0,
            expire_warning: 0,
            grace_expiry: 0,
            grace_authn_limit: 0,
            lockout: false,
            lockout_duration: 0,
            min_delay: 0,
            max_delay: 0,
            max_failure: 0,
            max_recorded_failure: 0,
            failure_count_interval: 0,
            must_change: false,
            allow_user_change: true,
            safe_modify: false,
            use_check_module: false,
            check_module_arg: None,
        }
    }
}

impl PolicyRecord {
    /// Enforces the cross-field invariants between failure thresholds and
    /// delays. Called by every constructor that takes external input.
    pub fn normalized(mut self) -> Self {
        if self.max_recorded_failure < self.max_failure {
            self.max_recorded_failure = self.max_failure;
        }
        if self.max_recorded_failure == 0 && self.min_delay > 0 {
            self.max_recorded_failure = DEFAULT_MAX_RECORDED_FAILURE;
        }
        if self.min_delay > 0 && self.max_delay == 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!("pwdMinDelay set without pwdMaxDelay, assuming they are equal");
            self.max_delay = self.min_delay;
        }
        self
    }

    /// Builds a policy from a policy entry's attributes (`pwdMaxAge`, ...).
    ///
    /// Attribute names are matched case-insensitively; only the first value
    /// of each attribute is used and unknown attributes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidValue`] when a numeric or boolean
    /// attribute does not parse.
    pub fn from_attributes(attrs: &BTreeMap<String, Vec<String>>) -> PolicyResult<Self> {
        let mut pp = PolicyRecord::default();
        for (name, values) in attrs {
            let Some(value) = values.first() else {
                continue;
            };
            let value = value.trim();
            let lower = name.to_ascii_lowercase();
            match lower.as_str() {
                "pwdminage" => pp.min_age = parse_u32(name, value)?,
                "pwdmaxage" => pp.max_age = parse_u32(name, value)?,
                "pwdmaxidle" => pp.max_idle = parse_u32(name, value)?,
                "pwdinhistory" => pp.in_history = parse_u32(name, value)?,
                "pwdcheckquality" => {
                    pp.check_quality = value
                        .parse::<i64>()
                        .ok()
                        .and_then(CheckQuality::from_level)
                        .ok_or_else(|| invalid(name, value))?
                }
                "pwdminlength" => pp.min_length = parse_u32(name, value)?,
                "pwdmaxlength" => pp.max_length = parse_u32(name, value)?,
                "pwdexpirewarning" => pp.expire_warning = parse_u32(name, value)?,
                "pwdgraceexpiry" => pp.grace_expiry = parse_u32(name, value)?,
                "pwdgraceauthnlimit" => pp.grace_authn_limit = parse_u32(name, value)?,
                "pwdlockout" => pp.lockout = parse_bool(name, value)?,
                "pwdlockoutduration" => pp.lockout_duration = parse_u32(name, value)?,
                "pwdmindelay" => pp.min_delay = parse_u32(name, value)?,
                "pwdmaxdelay" => pp.max_delay = parse_u32(name, value)?,
                "pwdmaxfailure" => pp.max_failure = parse_u32(name, value)?,
                "pwdmaxrecordedfailure" => pp.max_recorded_failure = parse_u32(name, value)?,
                "pwdfailurecountinterval" => {
                    pp.failure_count_interval = parse_u32(name, value)?
                }
                "pwdmustchange" => pp.must_change = parse_bool(name, value)?,
                "pwdallowuserchange" => pp.allow_user_change = parse_bool(name, value)?,
                "pwdsafemodify" => pp.safe_modify = parse_bool(name, value)?,
                "pwdusecheckmodule" => pp.use_check_module = parse_bool(name, value)?,
                "pwdcheckmodulearg" => pp.check_module_arg = Some(value.to_string()),
                "pwdcheckmodule" => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("ignoring obsolete policy attribute {}", name);
                }
                _ => {}
            }
        }
        Ok(pp.normalized())
    }
}

fn invalid(attribute: &str, value: &str) -> PolicyError {
    PolicyError::InvalidValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

fn parse_u32(attribute: &str, value: &str) -> PolicyResult<u32> {
    value.parse::<u32>().map_err(|_| invalid(attribute, value))
}

fn parse_bool(attribute: &str, value: &str) -> PolicyResult<bool> {
    if value.eq_ignore_ascii_case("TRUE") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("FALSE") {
        Ok(false)
    } else {
        Err(invalid(attribute, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[test]
    fn test_default_is_permissive() {
        let pp = PolicyRecord::default();
        assert!(pp.allow_user_change);
        assert!(!pp.lockout);
        assert_eq!(pp.in_history, 0);
        assert_eq!(pp.max_age, 0);
        assert_eq!(pp.check_quality, CheckQuality::Off);
    }

    #[test]
    fn test_from_attributes() {
        let pp = PolicyRecord::from_attributes(&attrs(&[
            ("pwdMaxAge", "86400"),
            ("pwdInHistory", "3"),
            ("pwdCheckQuality", "2"),
            ("pwdLockout", "TRUE"),
            ("pwdAllowUserChange", "FALSE"),
            ("pwdCheckModuleArg", "variety,pattern"),
            ("description", "ignored"),
        ]))
        .unwrap();
        assert_eq!(pp.max_age, 86400);
        assert_eq!(pp.in_history, 3);
        assert_eq!(pp.check_quality, CheckQuality::Mandatory);
        assert!(pp.lockout);
        assert!(!pp.allow_user_change);
        assert_eq!(pp.check_module_arg.as_deref(), Some("variety,pattern"));
    }

    #[test]
    fn test_unparseable_values_rejected() {
        let err = PolicyRecord::from_attributes(&attrs(&[("pwdMaxAge", "-1")])).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidValue { .. }));
        assert!(PolicyRecord::from_attributes(&attrs(&[("pwdLockout", "yes")])).is_err());
        assert!(PolicyRecord::from_attributes(&attrs(&[("pwdCheckQuality", "3")])).is_err());
    }

    #[test]
    fn test_normalization_invariants() {
        let pp = PolicyRecord::from_attributes(&attrs(&[
            ("pwdMaxFailure", "5"),
            ("pwdMaxRecordedFailure", "2"),
        ]))
        .unwrap();
        assert_eq!(pp.max_recorded_failure, 5);

        let pp = PolicyRecord::from_attributes(&attrs(&[("pwdMinDelay", "4")])).unwrap();
        assert_eq!(pp.max_delay, 4);
        assert_eq!(pp.max_recorded_failure, DEFAULT_MAX_RECORDED_FAILURE);
    }

    #[test]
    fn test_serde_defaults() {
        let pp: PolicyRecord = serde_json::from_str(r#"{"maxFailure":3,"lockout":true}"#).unwrap();
        assert_eq!(pp.max_failure, 3);
        assert!(pp.allow_user_change);
        assert_eq!(pp.normalized().max_recorded_failure, 3);
    }
}
