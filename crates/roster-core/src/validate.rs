//! Field validation rules shared by users and groups.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DirectoryError, Result};

static SHORTNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,30}$").expect("shortname pattern is valid"));

static MAIL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_.-]+@[A-Za-z0-9.-]+$").expect("mail address pattern is valid")
});

/// A POSIX-style account name: lowercase, at most 31 characters.
pub fn shortname(value: &str) -> Result<()> {
    if SHORTNAME.is_match(value) {
        Ok(())
    } else {
        Err(DirectoryError::InvalidField {
            field: "shortname",
            reason: format!("{value:?} must match [a-z_][a-z0-9_-]{{0,30}}"),
        })
    }
}

pub fn email(value: &str) -> Result<()> {
    mail_address("email", value)
}

pub fn principal_name(value: &str) -> Result<()> {
    mail_address("principalName", value)
}

fn mail_address(field: &'static str, value: &str) -> Result<()> {
    if MAIL_ADDRESS.is_match(value) {
        Ok(())
    } else {
        Err(DirectoryError::InvalidField {
            field,
            reason: format!("{value:?} is not a valid address"),
        })
    }
}

/// Validate an optional field only when a value is present.
pub fn optional(value: Option<&str>, check: fn(&str) -> Result<()>) -> Result<()> {
    value.map_or(Ok(()), check)
}
