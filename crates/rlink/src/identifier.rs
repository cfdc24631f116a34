//! Syntactic R identifiers

use crate::errors::BridgeError;

const RESERVED_WORDS: &[&str] = &[
    "if",
    "else",
    "repeat",
    "while",
    "function",
    "for",
    "next",
    "break",
    "in",
    "TRUE",
    "FALSE",
    "NULL",
    "Inf",
    "NaN",
    "NA",
    "NA_integer_",
    "NA_real_",
    "NA_character_",
    "NA_complex_",
    "...",
];

/// Whether `name` can be written unquoted on the left of `<-`
pub fn is_syntactic_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = match (chars.next(), chars.next()) {
        (Some(c), _) if c.is_alphabetic() => true,
        // A leading dot must not be followed by a digit
        (Some('.'), next) => next.is_none_or(|c| !c.is_ascii_digit()),
        _ => false,
    };
    valid_start
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '_')
        && !RESERVED_WORDS.contains(&name)
        && !is_dot_dot_number(name)
}

/// `..1`, `..2`, ... refer to elements of `...`
fn is_dot_dot_number(name: &str) -> bool {
    name.strip_prefix("..")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}

/// Fail with `InvalidIdentifier` unless `name` is syntactic
pub fn validate(name: &str) -> Result<(), BridgeError> {
    if is_syntactic_name(name) {
        Ok(())
    } else {
        Err(BridgeError::InvalidIdentifier(name.to_string()))
    }
}
