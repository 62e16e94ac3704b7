//! Client-side validation for the sign-up, sign-in and reset forms.
//!
//! Mirrors the rules the auth service enforces so obviously bad input never
//! leaves the client.

use lazy_static::lazy_static;
use regex::Regex;

/// Shortest password the auth service accepts
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// The service hashes with bcrypt, which ignores bytes past 72
pub const MAX_PASSWORD_LENGTH: usize = 72;

const MAX_NAME_LENGTH: usize = 100;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$"
    ).unwrap();
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password is too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

/// Validate a first or last name; `field` names it in the message
pub fn validate_name(field: &str, name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{} is required", field));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(format!(
            "{} is too long (max {} characters)",
            field, MAX_NAME_LENGTH
        ));
    }
    Ok(())
}
