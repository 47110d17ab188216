//! Workspace name rules.

use cpc_core::{CpcError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_NAME_LEN: usize = 50;

const RESERVED_NAMES: [&str; 3] = ["default", "null", "none"];

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$").expect("static pattern compiles")
});

/// Validate a workspace name.
///
/// Names start and end with an alphanumeric character, may contain hyphens
/// in between, and are at most 50 characters long.
pub fn validate_workspace_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CpcError::input("Workspace name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CpcError::input(format!(
            "Workspace name '{name}' is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(CpcError::input(format!(
            "Workspace name '{name}' is reserved"
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(CpcError::input(format!(
            "Invalid workspace name '{name}': use letters, digits and inner hyphens only"
        )));
    }
    Ok(())
}

/// Default release letter: the first alphanumeric character, lowercased.
pub fn derive_release_letter(name: &str) -> Result<char> {
    name.chars()
        .find(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .ok_or_else(|| {
            CpcError::input(format!(
                "Cannot derive a release letter from workspace name '{name}'"
            ))
        })
}

/// Normalize a user-supplied release letter.
pub fn normalize_release_letter(letter: char) -> Result<char> {
    if letter.is_ascii_alphanumeric() {
        Ok(letter.to_ascii_lowercase())
    } else {
        Err(CpcError::input(format!(
            "Release letter '{letter}' must be a letter or digit"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["ubuntu", "k8s-129", "a", "Dev2", "x-y-z"] {
            assert!(validate_workspace_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "-lead", "trail-", "has_underscore", "has space", "dot.name"] {
            assert!(validate_workspace_name(name).is_err(), "{name:?} should be invalid");
        }
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_workspace_name(&long).is_err());
        assert!(validate_workspace_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_reserved_names_rejected() {
        for name in ["default", "null", "None"] {
            let err = validate_workspace_name(name).expect_err("reserved");
            assert!(err.to_string().contains("reserved"));
        }
    }

    #[test]
    fn test_release_letter_derivation() {
        assert_eq!(derive_release_letter("Ubuntu").unwrap(), 'u');
        assert_eq!(derive_release_letter("9lives").unwrap(), '9');
        assert_eq!(normalize_release_letter('T').unwrap(), 't');
        assert!(normalize_release_letter('-').is_err());
    }
}
