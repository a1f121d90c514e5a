//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted user identifier.
pub const MAX_USER_ID_LEN: usize = 64;

/// Validates a user id: 1 to 64 characters of ASCII letters, digits, `-`, `_` or `.`.
///
/// # Examples
///
/// ```ignore
/// validate_user_id("alice_01") // Ok
/// validate_user_id("")         // Err - empty
/// validate_user_id("a b")      // Err - space
/// ```
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_USER_ID_LEN {
        let mut err = ValidationError::new("user_id_length");
        err.message = Some(
            format!(
                "User ID must be between 1 and {MAX_USER_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        let mut err = ValidationError::new("user_id_format");
        err.message =
            Some("User ID may only contain ASCII letters, digits, '-', '_' and '.'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name is not blank.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }
    Ok(())
}
