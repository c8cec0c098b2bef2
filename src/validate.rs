//! Input validation.
//!
//! Every check is a pure function returning `Ok(())` or a
//! [`ValidationError`] carrying a message fit to show next to the field.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ::time::{macros::format_description, Date};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(String);

pub type Validation = Result<(), ValidationError>;

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn fail(message: impl Into<String>) -> Validation {
    Err(ValidationError::new(message))
}

pub fn validate_required(label: &str, value: &str) -> Validation {
    if value.trim().is_empty() {
        return fail(format!("{label} is required"));
    }
    Ok(())
}

/// Length in characters, inclusive bounds.
pub fn validate_length(label: &str, value: &str, min: usize, max: usize) -> Validation {
    let len = value.chars().count();

    if len < min {
        return fail(format!("{label} must be at least {min} characters"));
    }
    if len > max {
        return fail(format!("{label} must be at most {max} characters"));
    }
    Ok(())
}

/// Rejects line breaks and other control characters.
pub fn validate_single_line(label: &str, value: &str) -> Validation {
    if value.chars().any(char::is_control) {
        return fail(format!("{label} must not contain line breaks or control characters"));
    }
    Ok(())
}

pub fn validate_matches(label: &str, value: &str, confirmation: &str) -> Validation {
    if value != confirmation {
        return fail(format!("{label} confirmation does not match"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Validation {
    if email.is_empty() {
        return fail("Email is required");
    }
    if is_valid_email(email) {
        Ok(())
    } else {
        fail("Please enter a valid email address")
    }
}

fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 {
        return false;
    }

    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && local.len() <= 64
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+=?^_`{|}~.-".contains(c));

    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels
            .last()
            .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));

    local_ok && domain_ok
}

/// New passwords must meet the complexity rules; existing ones only need to be present.
pub fn validate_password(password: &str, is_new: bool) -> Validation {
    if password.is_empty() {
        return fail("Password is required");
    }
    if !is_new {
        return Ok(());
    }

    if password.chars().count() < 8 {
        return fail("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return fail("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return fail("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return fail("Password must contain at least one number");
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return fail("Password must contain at least one special character");
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Validation {
    if username.is_empty() {
        return fail("Username is required");
    }
    validate_length("Username", username, 3, 50)?;

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return fail("Username may only contain letters, numbers and underscores");
    }
    Ok(())
}

/// Parse `value` as a number and check `min <= value <= max`.
pub fn validate_range<T>(label: &str, value: &str, min: T, max: T) -> Validation
where
    T: FromStr + PartialOrd + fmt::Display,
{
    let Ok(n) = value.trim().parse::<T>() else {
        return fail(format!("{label} must be a number"));
    };

    // written this way round so NaN fails too
    if !(n >= min && n <= max) {
        return fail(format!("{label} must be between {min} and {max}"));
    }
    Ok(())
}

/// `YYYY-MM-DD` naming a day that exists in the calendar.
pub fn validate_date(label: &str, value: &str) -> Validation {
    parse_date(value)
        .map(|_| ())
        .map_err(|()| ValidationError::new(format!("{label} must be a valid date (YYYY-MM-DD)")))
}

pub fn parse_date(value: &str) -> Result<Date, ()> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(value.trim(), &format).map_err(|_| ())
}

/// Field name to message, for the fields that failed on this request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<String, String>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `result` against `field`; the first failure per field wins.
    pub fn check(&mut self, field: &str, result: Validation) {
        if let Err(e) = result {
            self.0.entry(field.into()).or_insert(e.0);
        }
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert(message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emails() {
        for ok in [
            "user@example.com",
            "first.last+tag@sub.example.co.uk",
            "o'brien@example.ie",
            "x_y-z@a-b.io",
        ] {
            assert_eq!(validate_email(ok), Ok(()), "{ok}");
        }

        for bad in [
            "plainaddress",
            "@example.com",
            "user@",
            "user@localhost",
            "user@@example.com",
            ".user@example.com",
            "user.@example.com",
            "us..er@example.com",
            "user@-example.com",
            "user@example.c",
            "user@exa_mple.com",
            "user name@example.com",
            "user@example.123",
            "../x@example.com",
        ] {
            let err = validate_email(bad).unwrap_err();
            assert!(!err.message().is_empty(), "{bad}");
        }

        assert_eq!(validate_email("").unwrap_err().message(), "Email is required");
    }

    #[test]
    fn new_password_complexity() {
        assert_eq!(validate_password("Abcdef1!", true), Ok(()));

        // dropping any one property is rejected
        for weak in [
            "Abcde1!",  // too short
            "abcdef1!", // no upper
            "ABCDEF1!", // no lower
            "Abcdefg!", // no digit
            "Abcdefg1", // no special
        ] {
            assert!(validate_password(weak, true).is_err(), "{weak}");
        }
    }

    #[test]
    fn existing_password_only_needs_presence() {
        assert_eq!(validate_password("a", false), Ok(()));
        assert_eq!(
            validate_password("", false).unwrap_err().message(),
            "Password is required"
        );
    }

    #[test]
    fn usernames() {
        assert_eq!(validate_username("bob_99"), Ok(()));
        assert_eq!(validate_username(&"a".repeat(50)), Ok(()));
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
        assert!(validate_username("bob-smith").is_err());
        assert!(validate_username("bób").is_err());
    }

    #[test]
    fn single_line() {
        assert_eq!(validate_single_line("Name", "Ada Lovelace"), Ok(()));
        assert_eq!(validate_single_line("Name", "Zoë O'Brien"), Ok(()));
        for bad in ["Ada\nLovelace", "Ada\r", "tab\there", "nul\0"] {
            assert!(validate_single_line("Name", bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(validate_range("Qty", "1", 1, 10), Ok(()));
        assert_eq!(validate_range("Qty", "10", 1, 10), Ok(()));
        assert_eq!(
            validate_range("Qty", "11", 1, 10).unwrap_err().message(),
            "Qty must be between 1 and 10"
        );
        assert_eq!(
            validate_range("Qty", "ten", 1, 10).unwrap_err().message(),
            "Qty must be a number"
        );
        assert_eq!(validate_range("Price", "9.99", 0.0, 10.0), Ok(()));
        assert!(validate_range("Price", "NaN", 0.0, 10.0).is_err());
    }

    #[test]
    fn dates_must_exist() {
        assert_eq!(validate_date("Due", "2024-02-29"), Ok(()));
        assert!(validate_date("Due", "2023-02-29").is_err());
        assert!(validate_date("Due", "2024-13-01").is_err());
        assert!(validate_date("Due", "2024-04-31").is_err());
        assert!(validate_date("Due", "29/02/2024").is_err());
    }

    #[test]
    fn form_errors_keep_first_failure() {
        let mut errors = FormErrors::new();
        errors.check("email", validate_email(""));
        errors.check("email", validate_email("nope"));
        errors.check("name", validate_required("Name", "Bob"));

        assert_eq!(errors.get("email"), Some("Email is required"));
        assert_eq!(errors.get("name"), None);
        assert_eq!(errors.iter().count(), 1);
    }
}
