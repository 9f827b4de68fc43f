//! Client-side form validation.
//!
//! Validation runs before any provider call. Failures are returned as
//! [`AuthError`] values of kind `Validation` and never touch the shared
//! auth state; per-field errors live in [`FormErrors`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Minimum password length accepted anywhere.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Minimum display-name length after trimming.
pub const MIN_NAME_LEN: usize = 2;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

/// Form inputs that can carry a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Name,
    Email,
    Password,
    ConfirmPassword,
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormField::Name => write!(f, "name"),
            FormField::Email => write!(f, "email"),
            FormField::Password => write!(f, "password"),
            FormField::ConfirmPassword => write!(f, "confirm_password"),
        }
    }
}

/// Per-field error messages for one form.
///
/// Kept apart from the global auth error; editing a field clears only that
/// field's entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    errors: BTreeMap<FormField, String>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: FormField, message: impl Into<String>) {
        self.errors.insert(field, message.into());
    }

    /// Called when the user edits `field`.
    pub fn clear_field(&mut self, field: FormField) {
        self.errors.remove(&field);
    }

    pub fn get(&self, field: FormField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormField, &str)> {
        self.errors.iter().map(|(field, msg)| (*field, msg.as_str()))
    }

    /// The first failing field (in form order) as an error.
    pub fn first(&self) -> Option<AuthError> {
        self.errors
            .iter()
            .next()
            .map(|(field, msg)| AuthError::validation(*field, msg.clone()))
    }

    /// `Ok` when no field failed.
    ///
    /// # Errors
    /// Returns the first failing field.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self.first() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&mut self, result: Result<(), AuthError>) {
        if let Err(err) = result
            && let Some(field) = err.field
        {
            self.set(field, err.message);
        }
    }
}

/// True if `email` looks like `local@domain.tld`.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Checks an email field.
///
/// # Errors
/// Returns a validation error for blank or malformed input.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.trim().is_empty() {
        return Err(AuthError::validation(FormField::Email, "Email is required"));
    }
    if !is_valid_email(email) {
        return Err(AuthError::validation(
            FormField::Email,
            "Please enter a valid email",
        ));
    }
    Ok(())
}

/// Checks a password on the sign-in form.
///
/// # Errors
/// Returns a validation error for blank or short passwords.
pub fn validate_login_password(password: &str) -> Result<(), AuthError> {
    if password.trim().is_empty() {
        return Err(AuthError::validation(
            FormField::Password,
            "Password is required",
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(
            FormField::Password,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// Checks a password being set (sign-up, password change).
///
/// # Errors
/// Returns a validation error unless the password also mixes cases and digits.
pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    validate_login_password(password)?;

    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(AuthError::validation(
            FormField::Password,
            "Password must contain uppercase, lowercase, and number",
        ));
    }
    Ok(())
}

/// Checks a display name.
///
/// # Errors
/// Returns a validation error for blank or too-short names.
pub fn validate_name(name: &str) -> Result<(), AuthError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuthError::validation(FormField::Name, "Name is required"));
    }
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(AuthError::validation(
            FormField::Name,
            format!("Name must be at least {MIN_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Checks the confirm-password field against the password.
///
/// # Errors
/// Returns a validation error if blank or different.
pub fn validate_confirm_password(password: &str, confirm: &str) -> Result<(), AuthError> {
    if confirm.trim().is_empty() {
        return Err(AuthError::validation(
            FormField::ConfirmPassword,
            "Please confirm your password",
        ));
    }
    if password != confirm {
        return Err(AuthError::validation(
            FormField::ConfirmPassword,
            "Passwords do not match",
        ));
    }
    Ok(())
}

/// Sign-in form: email + password.
pub fn validate_login(email: &str, password: &str) -> FormErrors {
    let mut errors = FormErrors::new();
    errors.record(validate_email(email));
    errors.record(validate_login_password(password));
    errors
}

/// Registration form. `confirm` is `None` when the caller has no
/// confirm-password input.
pub fn validate_registration(
    name: &str,
    email: &str,
    password: &str,
    confirm: Option<&str>,
) -> FormErrors {
    let mut errors = FormErrors::new();
    errors.record(validate_name(name));
    errors.record(validate_email(email));
    errors.record(validate_new_password(password));
    if let Some(confirm) = confirm {
        errors.record(validate_confirm_password(password, confirm));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_format() {
        assert!(is_valid_email("ann@x.com"));
        assert!(is_valid_email("a.b+c@sub.example.org"));
        assert!(!is_valid_email("ann@x"));
        assert!(!is_valid_email("ann x@y.com"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_validate_email_messages() {
        assert_eq!(validate_email("  ").unwrap_err().message, "Email is required");
        assert_eq!(
            validate_email("not-an-email").unwrap_err().message,
            "Please enter a valid email"
        );
        assert!(validate_email("ann@x.com").is_ok());
    }

    #[test]
    fn test_login_password_length_only() {
        assert!(validate_login_password("abcdef").is_ok());
        let err = validate_login_password("abc").unwrap_err();
        assert_eq!(err.field, Some(FormField::Password));
        assert!(err.message.contains("at least 6"));
    }

    #[test]
    fn test_new_password_requires_mixed_classes() {
        assert!(validate_new_password("Abc123!!").is_ok());
        assert!(validate_new_password("abc123!!").is_err());
        assert!(validate_new_password("ABC123!!").is_err());
        assert!(validate_new_password("Abcdefgh").is_err());
    }

    #[test]
    fn test_name_is_trimmed() {
        assert!(validate_name(" Ann ").is_ok());
        assert_eq!(
            validate_name(" A ").unwrap_err().message,
            "Name must be at least 2 characters"
        );
        assert_eq!(validate_name("").unwrap_err().message, "Name is required");
    }

    /// Registration collects one error per failing field.
    #[test]
    fn test_registration_collects_field_errors() {
        let errors = validate_registration("A", "bad", "short", Some("other"));
        assert!(errors.get(FormField::Name).is_some());
        assert!(errors.get(FormField::Email).is_some());
        assert!(errors.get(FormField::Password).is_some());
        assert_eq!(
            errors.get(FormField::ConfirmPassword),
            Some("Passwords do not match")
        );
        assert_eq!(errors.first().unwrap().field, Some(FormField::Name));
    }

    #[test]
    fn test_registration_valid() {
        let errors = validate_registration("Ann", "ann@x.com", "Abc123!!", Some("Abc123!!"));
        assert!(errors.is_empty());
        assert!(errors.into_result().is_ok());
    }

    /// Editing a field clears only that field's error.
    #[test]
    fn test_clear_field_is_independent() {
        let mut errors = validate_login("bad", "");
        assert_eq!(errors.iter().count(), 2);

        errors.clear_field(FormField::Email);
        assert_eq!(errors.get(FormField::Email), None);
        assert_eq!(errors.get(FormField::Password), Some("Password is required"));
    }
}
