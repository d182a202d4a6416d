use crate::error::BotError;

const MAX_NAME_LEN: usize = 64;

/// Check that `name` is safe to use as a directory and log file name.
///
/// Allowed: ASCII letters, digits, `.`, `_` and `-`, not starting with `.`.
pub fn validate_bot_name(name: &str) -> Result<(), BotError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(BotError::InvalidName(name.to_string()))
    }
}
