//! Validation helpers for DTOs.

use validator::ValidationError;

/// Minimum number of non-blank options a poll must offer.
pub const MIN_POLL_OPTIONS: usize = 2;

/// Validates that a text field contains something other than whitespace.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a poll offers at least [`MIN_POLL_OPTIONS`] non-blank options.
///
/// Blank entries are tolerated (they are dropped when the poll is created) but do not count.
///
/// # Examples
///
/// ```ignore
/// validate_poll_options(&["Red".into(), "Blue".into()]) // Ok
/// validate_poll_options(&["Red".into(), "  ".into()])   // Err - one usable option
/// ```
pub fn validate_poll_options(options: &[String]) -> Result<(), ValidationError> {
    let usable = options
        .iter()
        .filter(|option| !option.trim().is_empty())
        .count();

    if usable < MIN_POLL_OPTIONS {
        let mut err = ValidationError::new("poll_options_count");
        err.message = Some(
            format!("A poll needs at least {MIN_POLL_OPTIONS} non-blank options (got {usable})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}
