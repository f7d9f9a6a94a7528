//! Common-password word list
//!
//! Loads and queries the list used by the built-in strength module.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

static COMMON_PASSWORDS: RwLock<Option<HashSet<String>>> = RwLock::new(None);

#[derive(Error, Debug)]
pub enum BlacklistError {
    #[error("Blacklist file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Failed to read blacklist file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Blacklist file is empty")]
    EmptyFile,
}

fn read_guard() -> RwLockReadGuard<'static, Option<HashSet<String>>> {
    match COMMON_PASSWORDS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_guard() -> RwLockWriteGuard<'static, Option<HashSet<String>>> {
    match COMMON_PASSWORDS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Returns the blacklist file path.
///
/// Priority:
/// 1. Environment variable `PWD_BLACKLIST_PATH`
/// 2. Default path `./assets/blacklist.txt`
pub fn get_blacklist_path() -> PathBuf {
    std::env::var("PWD_BLACKLIST_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./assets/blacklist.txt"))
}

/// Initializes the word list from the file named by `PWD_BLACKLIST_PATH`.
///
/// # Errors
///
/// Returns error if:
/// - File does not exist
/// - File cannot be read
/// - File is empty
///
/// # Example
///
/// ```rust,ignore
/// unsafe { std::env::set_var("PWD_BLACKLIST_PATH", "/etc/ldap/common-passwords.txt"); }
/// pwd_policy::init_blacklist()?;
/// ```
pub fn init_blacklist() -> Result<usize, BlacklistError> {
    let path = get_blacklist_path();
    init_blacklist_from_path(&path)
}

/// Initializes the word list from a specific file path.
///
/// Loading is idempotent: once a list is loaded, later calls return its
/// size without reading anything.
///
/// # Arguments
///
/// * `path` - Path to the word list, one password per line
///
/// # Errors
///
/// Same as [`init_blacklist`].
pub fn init_blacklist_from_path<P: AsRef<Path>>(path: P) -> Result<usize, BlacklistError> {
    if let Some(set) = read_guard().as_ref() {
        return Ok(set.len());
    }

    let path = path.as_ref();

    if !path.exists() {
        #[cfg(feature = "tracing")]
        tracing::error!("Blacklist initialization FAILED: FileNotFound {:?}", path);
        return Err(BlacklistError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;

    if content.trim().is_empty() {
        #[cfg(feature = "tracing")]
        tracing::error!("Blacklist initialization FAILED: Empty file {:?}", path);
        return Err(BlacklistError::EmptyFile);
    }

    let set: HashSet<String> = content
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    let count = set.len();
    *write_guard() = Some(set);

    #[cfg(feature = "tracing")]
    tracing::info!("Blacklist initialized: {} passwords from {:?}", count, path);

    Ok(count)
}

/// Loads the list from the default location unless one is already loaded.
pub(crate) fn ensure_blacklist() -> Result<(), BlacklistError> {
    if read_guard().is_some() {
        return Ok(());
    }
    init_blacklist().map(|_| ())
}

/// Checks if a password is in the word list (case-insensitive).
///
/// Returns `false` if the list is not loaded.
pub fn is_blacklisted(password: &str) -> bool {
    read_guard()
        .as_ref()
        .is_some_and(|bl| bl.contains(&password.to_lowercase()))
}

/// Resets the blacklist for testing purposes.
#[cfg(test)]
pub fn reset_blacklist_for_testing() {
    *write_guard() = None;
}
