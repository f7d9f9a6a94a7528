//! Blacklist section - checks if password is in the common password list.

use super::SectionResult;
use crate::blacklist::{ensure_blacklist, is_blacklisted};
use crate::state::AccountState;
use secrecy::{ExposeSecret, SecretString};

/// Checks if the password is in the list of common passwords.
///
/// # Returns
/// - `Ok(Some(reason))` if password is listed
/// - `Ok(None)` if password is not listed
/// - `Err(())` if the list cannot be loaded
pub fn blacklist_section(password: &SecretString, _entry: &AccountState) -> SectionResult {
    if let Err(_e) = ensure_blacklist() {
        #[cfg(feature = "tracing")]
        tracing::error!("password word list unavailable: {}", _e);
        return Err(());
    }
    if is_blacklisted(password.expose_secret()) {
        return Ok(Some("Password is too common".to_string()));
    }
    Ok(None)
}
