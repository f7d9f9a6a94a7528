//! Directory password policy library
//!
//! This library enforces a password policy around authentication and
//! password changes: failure counting with backoff and lockout, password
//! aging with grace logins and expiry warnings, password history, quality
//! checks through a pluggable module, and per-connection restrictions
//! after an administrative reset.
//!
//! The [`PolicyEngine`] decides each operation and emits an ordered list of
//! state changes, written through an [`EntryStore`].
//!
//! # Features
//!
//! - `async` (default): Enables async quality checks with cancellation support
//! - `tracing` (default): Enables logging via tracing crate
//!
//! # Environment Variables
//!
//! - `PWD_BLACKLIST_PATH`: Custom path to the common-password list used by
//!   the built-in `strength` check module (default: `./assets/blacklist.txt`)
//!
//! # Example
//!
//! ```rust,no_run
//! use pwd_policy::{AccountState, InMemoryStore, OpContext, OverlayConfig, PolicyEngine};
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! let config = OverlayConfig::from_path("ppolicy.json").expect("Failed to load configuration");
//! let store = Arc::new(InMemoryStore::new());
//! store.insert(AccountState::new("uid=alice,dc=example").with_password("s3cret"));
//!
//! let engine = PolicyEngine::new(config, store).expect("Failed to build policy engine");
//! let password = SecretString::new("s3cret".to_string().into());
//! let ctx = OpContext::new(0).with_policy_control();
//!
//! let outcome = engine.bind(&ctx, "uid=alice,dc=example", &password);
//! println!("Result: {}", outcome.code);
//! println!("Advisory: {:?}", outcome.control);
//! ```

pub mod config;
pub mod controls;
pub mod dn;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod failure;
pub mod filter;
pub mod history;
pub mod lockout;
pub mod policy;
pub mod quality;
pub mod rules;
pub mod scheme;
pub mod session;
pub mod state;
pub mod store;
pub mod strength;
pub mod time;

// Internal modules
mod blacklist;
mod sections;

// Public API
pub use blacklist::{BlacklistError, init_blacklist, init_blacklist_from_path, is_blacklisted};
pub use config::OverlayConfig;
pub use controls::{AccountUsability, PolicyResponse, PolicyWarning, ResponseControl, UnusableReasons};
pub use engine::{BindOutcome, ModifyRequest, OpContext, PolicyEngine};
pub use error::{PasswordPolicyError, PolicyError, PolicyResult, Rejection, ResultCode};
pub use policy::{CheckQuality, PolicyRecord};
pub use quality::{CheckFailure, CheckModule, QualityChecker, QualityViolation};
pub use rules::{PolicyRule, PolicySet, PolicyStore};
pub use scheme::{DefaultSchemes, PasswordSchemes};
pub use session::OperationKind;
pub use state::{AccountState, Attr, Mutation};
pub use store::{EntryStore, InMemoryStore, WriteRoute};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(feature = "async")]
pub use quality::{QualityVerdict, check_password_quality_tx};
