//! Error types shared across the policy engine.

use std::fmt;
use thiserror::Error;

use crate::controls::ResponseControl;

/// Configuration and collaborator failures.
///
/// These never carry password material. Evaluation-time problems with a
/// policy (missing entry, bad reference) are not errors: resolution falls
/// back to a default policy instead.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("invalid value {value:?} for policy attribute {attribute}")]
    InvalidValue { attribute: String, value: String },

    #[error("bad policy URL: {0}")]
    BadUrl(String),

    #[error("bad policy filter: {0}")]
    BadFilter(String),

    #[error("bad DN: {0}")]
    BadDn(String),

    #[error("bad policy rule: {0}")]
    BadRule(String),

    #[error("rule position {0} out of range")]
    RulePosition(usize),

    #[error("unknown policy {0}")]
    UnknownPolicy(String),

    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("entry store error: {0}")]
    Store(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Password policy error kinds reported in the policy response advisory.
///
/// Declaration order is priority order: when several conditions apply the
/// earlier variant is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PasswordPolicyError {
    AccountLocked,
    ChangeAfterReset,
    PasswordExpired,
    MustSupplyOldPassword,
    PasswordModNotAllowed,
    InsufficientPasswordQuality,
    PasswordTooShort,
    PasswordTooLong,
    PasswordInHistory,
    PasswordTooYoung,
}

impl PasswordPolicyError {
    /// Enumerated value carried in the response advisory.
    pub fn code(self) -> u8 {
        match self {
            PasswordPolicyError::PasswordExpired => 0,
            PasswordPolicyError::AccountLocked => 1,
            PasswordPolicyError::ChangeAfterReset => 2,
            PasswordPolicyError::PasswordModNotAllowed => 3,
            PasswordPolicyError::MustSupplyOldPassword => 4,
            PasswordPolicyError::InsufficientPasswordQuality => 5,
            PasswordPolicyError::PasswordTooShort => 6,
            PasswordPolicyError::PasswordTooLong => 7,
            PasswordPolicyError::PasswordTooYoung => 8,
            PasswordPolicyError::PasswordInHistory => 9,
        }
    }
}

impl fmt::Display for PasswordPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PasswordPolicyError::AccountLocked => "accountLocked",
            PasswordPolicyError::ChangeAfterReset => "changeAfterReset",
            PasswordPolicyError::PasswordExpired => "passwordExpired",
            PasswordPolicyError::MustSupplyOldPassword => "mustSupplyOldPassword",
            PasswordPolicyError::PasswordModNotAllowed => "passwordModNotAllowed",
            PasswordPolicyError::InsufficientPasswordQuality => "insufficientPasswordQuality",
            PasswordPolicyError::PasswordTooShort => "passwordTooShort",
            PasswordPolicyError::PasswordTooLong => "passwordTooLong",
            PasswordPolicyError::PasswordInHistory => "passwordInHistory",
            PasswordPolicyError::PasswordTooYoung => "passwordTooYoung",
        };
        f.write_str(name)
    }
}

/// Protocol result code of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    InvalidCredentials,
    ConstraintViolation,
    InsufficientAccess,
    UnwillingToPerform,
    NoSuchObject,
    CompareTrue,
    CompareFalse,
    Other,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Success => "success",
            ResultCode::InvalidCredentials => "invalidCredentials",
            ResultCode::ConstraintViolation => "constraintViolation",
            ResultCode::InsufficientAccess => "insufficientAccessRights",
            ResultCode::UnwillingToPerform => "unwillingToPerform",
            ResultCode::NoSuchObject => "noSuchObject",
            ResultCode::CompareTrue => "compareTrue",
            ResultCode::CompareFalse => "compareFalse",
            ResultCode::Other => "other",
        };
        f.write_str(name)
    }
}

/// An operation refused by the policy.
///
/// `error` is the policy detail; it only reaches the client through
/// `control`, which is present when the caller asked for the policy
/// response advisory.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {text}")]
pub struct Rejection {
    pub code: ResultCode,
    pub error: Option<PasswordPolicyError>,
    pub text: String,
    pub control: Option<ResponseControl>,
}

impl Rejection {
    pub fn new(code: ResultCode, error: PasswordPolicyError, text: impl Into<String>) -> Self {
        Self {
            code,
            error: Some(error),
            text: text.into(),
            control: None,
        }
    }

    pub fn plain(code: ResultCode, text: impl Into<String>) -> Self {
        Self {
            code,
            error: None,
            text: text.into(),
            control: None,
        }
    }

    /// Attaches the policy response advisory when the caller requested it.
    pub(crate) fn with_control(mut self, requested: bool) -> Self {
        if requested {
            self.control = Some(ResponseControl::error_only(self.error));
        }
        self
    }
}
