//! Identity section - rejects passwords built around the account's own name.

use super::SectionResult;
use crate::state::AccountState;
use secrecy::{ExposeSecret, SecretString};

/// Shortest name fragment worth looking for.
const MIN_NAME_LEN: usize = 3;

/// Checks that the password does not contain the leading RDN value of the
/// entry (`bob` for `uid=bob,ou=people,...`), ignoring case.
pub fn identity_section(password: &SecretString, entry: &AccountState) -> SectionResult {
    let Some(name) = rdn_value(&entry.dn) else {
        return Ok(None);
    };
    if name.chars().count() < MIN_NAME_LEN {
        return Ok(None);
    }
    if password.expose_secret().to_lowercase().contains(&name) {
        return Ok(Some("Password contains the account name".to_string()));
    }
    Ok(None)
}

fn rdn_value(dn: &str) -> Option<String> {
    let first = dn.split(',').next()?;
    let (_, value) = first.split_once('=')?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_lowercase())
}
