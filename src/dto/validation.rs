//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::join_code::JoinCode;

/// Shortest time limit a question may have, in seconds.
pub const MIN_TIME_LIMIT_SECS: u32 = 5;
/// Longest time limit a question may have, in seconds.
pub const MAX_TIME_LIMIT_SECS: u32 = 240;
/// Fewest options a question may offer.
pub const MIN_OPTIONS: usize = 2;
/// Most options a question may offer.
pub const MAX_OPTIONS: usize = 8;

/// Validates that a join code is a six-digit PIN.
///
/// # Examples
///
/// ```ignore
/// validate_join_code("123456") // Ok
/// validate_join_code("12345")  // Err - too short
/// validate_join_code("012345") // Err - below range
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    code.parse::<JoinCode>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must be a six-digit number".into());
        err
    })
}

/// Validates that a display name is not blank once trimmed.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Validates the option list of a question: bounded size and at least one correct choice.
pub fn validate_question_options(
    option_count: usize,
    correct_count: usize,
) -> Result<(), ValidationError> {
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&option_count) {
        let mut err = ValidationError::new("options_count");
        err.message = Some(
            format!(
                "A question needs between {MIN_OPTIONS} and {MAX_OPTIONS} options (got {option_count})"
            )
            .into(),
        );
        return Err(err);
    }

    if correct_count == 0 {
        let mut err = ValidationError::new("options_correct");
        err.message = Some("A question needs at least one correct option".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a question time limit lies within the accepted bounds.
pub fn validate_time_limit(secs: u32) -> Result<(), ValidationError> {
    if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&secs) {
        let mut err = ValidationError::new("time_limit_range");
        err.message = Some(
            format!(
                "Time limit must be between {MIN_TIME_LIMIT_SECS} and {MAX_TIME_LIMIT_SECS} seconds (got {secs})"
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_join_code() {
        assert!(validate_join_code("123456").is_ok());
        assert!(validate_join_code(" 999999 ").is_ok());
        assert!(validate_join_code("12345").is_err()); // too short
        assert!(validate_join_code("1234567").is_err()); // too long
        assert!(validate_join_code("099999").is_err()); // below range
        assert!(validate_join_code("12a456").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("").is_err());
    }

    #[test]
    fn test_validate_question_options() {
        assert!(validate_question_options(2, 1).is_ok());
        assert!(validate_question_options(8, 3).is_ok());
        assert!(validate_question_options(1, 1).is_err());
        assert!(validate_question_options(9, 1).is_err());
        assert!(validate_question_options(4, 0).is_err());
    }

    #[test]
    fn test_validate_time_limit() {
        assert!(validate_time_limit(5).is_ok());
        assert!(validate_time_limit(240).is_ok());
        assert!(validate_time_limit(4).is_err());
        assert!(validate_time_limit(241).is_err());
    }
}
