use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{CoreError, Result};

pub const TITLE_MAX: usize = 500;
pub const DESCRIPTION_MAX: usize = 2000;
pub const TAG_NAME_MAX: usize = 100;
pub const DISPLAY_NAME_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 8;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"))
}

/// Validation utilities shared by the service layer and the agent's tool
/// dispatcher. All checks operate on trimmed input.
pub struct Validator;

impl Validator {
    /// Titles must be non-empty after trimming and at most 500 characters.
    pub fn validate_title(title: &str) -> Result<()> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(CoreError::empty_field("title"));
        }
        if trimmed.chars().count() > TITLE_MAX {
            return Err(CoreError::too_long("title", TITLE_MAX));
        }
        Ok(())
    }

    /// Descriptions are optional but bounded.
    pub fn validate_description(description: &str) -> Result<()> {
        if description.chars().count() > DESCRIPTION_MAX {
            return Err(CoreError::too_long("description", DESCRIPTION_MAX));
        }
        Ok(())
    }

    /// Tag names must be 1..=100 characters after trimming.
    pub fn validate_tag_name(name: &str) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::empty_field("tag"));
        }
        if trimmed.chars().count() > TAG_NAME_MAX {
            return Err(CoreError::too_long("tag", TAG_NAME_MAX));
        }
        Ok(())
    }

    /// Case-fold a tag name for comparison and storage.
    pub fn fold_tag_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn validate_email(email: &str) -> Result<()> {
        let trimmed = email.trim();
        if trimmed.is_empty() {
            return Err(CoreError::empty_field("email"));
        }
        if !email_regex().is_match(trimmed) {
            return Err(CoreError::Validation("invalid email address".to_string()));
        }
        Ok(())
    }

    pub fn validate_password(password: &str) -> Result<()> {
        if password.chars().count() < PASSWORD_MIN {
            return Err(CoreError::Validation(format!(
                "password must be at least {PASSWORD_MIN} characters"
            )));
        }
        Ok(())
    }

    pub fn validate_display_name(name: &str) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::empty_field("display_name"));
        }
        if trimmed.chars().count() > DISPLAY_NAME_MAX {
            return Err(CoreError::too_long("display_name", DISPLAY_NAME_MAX));
        }
        Ok(())
    }

    /// Reminders must be strictly in the future at the moment of setting.
    pub fn validate_remind_at(remind_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        if remind_at <= now {
            return Err(CoreError::Validation(
                "reminder time must be in the future".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_title_bounds() {
        assert!(Validator::validate_title("buy milk").is_ok());
        assert!(Validator::validate_title("  ").is_err());
        assert!(Validator::validate_title("").is_err());
        assert!(Validator::validate_title(&"x".repeat(500)).is_ok());
        assert!(Validator::validate_title(&"x".repeat(501)).is_err());
    }

    #[test]
    fn test_description_bounds() {
        assert!(Validator::validate_description("").is_ok());
        assert!(Validator::validate_description(&"d".repeat(2000)).is_ok());
        assert!(Validator::validate_description(&"d".repeat(2001)).is_err());
    }

    #[test]
    fn test_tag_name_bounds_and_folding() {
        assert!(Validator::validate_tag_name("Work").is_ok());
        assert!(Validator::validate_tag_name(" ").is_err());
        assert!(Validator::validate_tag_name(&"t".repeat(101)).is_err());
        assert_eq!(Validator::fold_tag_name("  WoRk "), "work");
    }

    #[test]
    fn test_email_shape() {
        assert!(Validator::validate_email("a@x.y").is_ok());
        assert!(Validator::validate_email("  a@x.y  ").is_ok());
        assert!(Validator::validate_email("ax.y").is_err());
        assert!(Validator::validate_email("a@xy").is_err());
        assert!(Validator::validate_email("a b@x.y").is_err());
        assert!(Validator::validate_email("").is_err());
    }

    #[test]
    fn test_password_minimum() {
        assert!(Validator::validate_password("secret123").is_ok());
        assert!(Validator::validate_password("short").is_err());
    }

    #[test]
    fn test_remind_at_must_be_future() {
        let now = Utc::now();
        assert!(Validator::validate_remind_at(now + Duration::seconds(70), now).is_ok());
        assert!(Validator::validate_remind_at(now, now).is_err());
        assert!(Validator::validate_remind_at(now - Duration::seconds(1), now).is_err());
    }
}
