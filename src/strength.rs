//! Built-in strength check module.
//!
//! Runs a selection of strength sections over the candidate. The policy's
//! module argument is a comma separated list of section names
//! (`blacklist`, `variety`, `pattern`, `identity`); without one every
//! section runs. The first failing section decides the message.

use secrecy::SecretString;

use crate::quality::{CheckFailure, CheckModule};
use crate::sections::{
    Section, blacklist_section, character_variety_section, identity_section,
    pattern_analysis_section,
};
use crate::state::AccountState;

const SECTIONS: [(&str, Section); 4] = [
    ("blacklist", blacklist_section),
    ("variety", character_variety_section),
    ("pattern", pattern_analysis_section),
    ("identity", identity_section),
];

/// Name under which the configuration refers to this module.
pub const STRENGTH_MODULE: &str = "strength";

#[derive(Debug, Default, Clone, Copy)]
pub struct StrengthModule;

impl StrengthModule {
    fn selected(arg: Option<&str>) -> Result<Vec<(&'static str, Section)>, CheckFailure> {
        let Some(arg) = arg.map(str::trim).filter(|a| !a.is_empty()) else {
            return Ok(SECTIONS.to_vec());
        };
        arg.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                SECTIONS
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(name))
                    .copied()
                    .ok_or_else(|| CheckFailure(format!("unknown strength section {name:?}")))
            })
            .collect()
    }
}

impl CheckModule for StrengthModule {
    fn check(&self, password: &SecretString, entry: &AccountState, arg: Option<&str>) -> Result<(), CheckFailure> {
        for (_section_name, section_fn) in Self::selected(arg)? {
            match section_fn(password, entry) {
                Ok(Some(reason)) => return Err(CheckFailure(reason)),
                Ok(None) => {}
                Err(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Fatal error in password strength section: {}", _section_name);
                    return Err(CheckFailure("Password strength could not be checked".to_string()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value); }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key); }
    }

    fn setup_blacklist() -> NamedTempFile {
        crate::blacklist::reset_blacklist_for_testing();
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        for pwd in ["password", "Summer2024!", "qwerty"] {
            writeln!(temp_file, "{}", pwd).expect("Failed to write");
        }
        set_env("PWD_BLACKLIST_PATH", temp_file.path().to_str().unwrap());
        temp_file
    }

    fn check(pwd: &str, arg: Option<&str>) -> Result<(), CheckFailure> {
        let entry = AccountState::new("uid=carol,dc=example");
        StrengthModule.check(&SecretString::new(pwd.to_string().into()), &entry, arg)
    }

    #[test]
    #[serial]
    fn test_strong_password_passes_all_sections() {
        let _list = setup_blacklist();
        assert_eq!(check("Tr0ub4dor&Zebra", None), Ok(()));
        remove_env("PWD_BLACKLIST_PATH");
    }

    #[test]
    #[serial]
    fn test_first_failing_section_wins() {
        let _list = setup_blacklist();
        let err = check("summer2024!", None).unwrap_err();
        assert_eq!(err.0, "Password is too common");
        let err = check("Carol#Rocks9", None).unwrap_err();
        assert_eq!(err.0, "Password contains the account name");
        remove_env("PWD_BLACKLIST_PATH");
    }

    #[test]
    #[serial]
    fn test_argument_selects_sections() {
        crate::blacklist::reset_blacklist_for_testing();
        set_env("PWD_BLACKLIST_PATH", "/nonexistent/words.txt");
        // the word list is never consulted
        assert_eq!(check("Carol#Rocks9", Some("variety, pattern")), Ok(()));
        assert!(check("alllowercase", Some("VARIETY")).is_err());
        remove_env("PWD_BLACKLIST_PATH");
    }

    #[test]
    #[serial]
    fn test_missing_word_list_fails_closed() {
        crate::blacklist::reset_blacklist_for_testing();
        set_env("PWD_BLACKLIST_PATH", "/nonexistent/words.txt");
        let err = check("Tr0ub4dor&Zebra", Some("blacklist")).unwrap_err();
        assert_eq!(err.0, "Password strength could not be checked");
        remove_env("PWD_BLACKLIST_PATH");
    }

    #[test]
    fn test_unknown_section_is_a_failure() {
        let err = check("Tr0ub4dor&Zebra", Some("variety,entropy")).unwrap_err();
        assert!(err.0.contains("entropy"));
    }
}
