//! Strength sections used by the built-in check module
//!
//! Each section inspects one aspect of a candidate password.

mod blacklist;
mod identity;
mod pattern;
mod variety;

pub use blacklist::blacklist_section;
pub use identity::identity_section;
pub use pattern::pattern_analysis_section;
pub use variety::character_variety_section;

use crate::state::AccountState;
use secrecy::SecretString;

/// Result type for section evaluation functions.
/// - `Ok(Some(reason))` - Section failed with reason
/// - `Ok(None)` - Section passed
/// - `Err(())` - The section could not run
pub type SectionResult = Result<Option<String>, ()>;

pub type Section = fn(&SecretString, &AccountState) -> SectionResult;
