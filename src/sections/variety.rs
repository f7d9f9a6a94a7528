//! Character variety section - counts uppercase, lowercase, digit and special classes.

use super::SectionResult;
use crate::state::AccountState;
use secrecy::{ExposeSecret, SecretString};

/// Character classes a password must draw from.
const REQUIRED_CLASSES: usize = 3;

/// Checks that the password mixes enough character classes.
///
/// # Returns
/// - `Ok(Some(reason))` if fewer than three classes are present
/// - `Ok(None)` otherwise
pub fn character_variety_section(password: &SecretString, _entry: &AccountState) -> SectionResult {
    let pwd = password.expose_secret();
    let classes = [
        ("uppercase", pwd.chars().any(|c| c.is_uppercase())),
        ("lowercase", pwd.chars().any(|c| c.is_lowercase())),
        ("numbers", pwd.chars().any(|c| c.is_ascii_digit())),
        ("special characters", pwd.chars().any(|c| !c.is_alphanumeric())),
    ];
    let present = classes.iter().filter(|(_, has)| *has).count();
    if present >= REQUIRED_CLASSES {
        return Ok(None);
    }

    let missing: Vec<&str> = classes
        .iter()
        .filter(|(_, has)| !has)
        .map(|(name, _)| *name)
        .collect();
    Ok(Some(format!(
        "Password needs {} more of: {}",
        REQUIRED_CLASSES - present,
        missing.join(", ")
    )))
}
