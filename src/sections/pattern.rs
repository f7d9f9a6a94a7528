//! Pattern analysis section - detects repetitive and sequential runs.

use super::SectionResult;
use crate::state::AccountState;
use secrecy::{ExposeSecret, SecretString};

/// Analyzes password for repetitive and sequential patterns.
///
/// # Returns
/// - `Ok(Some(reason))` if problematic patterns found
/// - `Ok(None)` if no problematic patterns
pub fn pattern_analysis_section(password: &SecretString, _entry: &AccountState) -> SectionResult {
    let chars: Vec<char> = password.expose_secret().chars().collect();
    if chars.len() < 3 {
        return Ok(None);
    }

    // three identical characters in a row
    if chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]) {
        return Ok(Some("Password contains repetitive patterns".to_string()));
    }

    // four or more consecutive code points, ascending or descending
    let is_sequential = chars.windows(4).any(|window| {
        let step = window[1] as i64 - window[0] as i64;
        (step == 1 || step == -1)
            && window
                .windows(2)
                .all(|w| w[1] as i64 - w[0] as i64 == step)
    });
    if is_sequential {
        return Ok(Some("Password contains sequential patterns".to_string()));
    }

    Ok(None)
}
