use llm_core::Message;

use crate::error::ApiError;

/// Validate the text of an `/audio` request and return it.
///
/// Overlong text is not an error: synthesis truncates it.
pub fn validate_speech_text(text: Option<&str>) -> Result<&str, ApiError> {
    match text {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(ApiError::InvalidInput("No text provided".to_string())),
    }
}

/// Validate the conversation of a `/chat` request.
///
/// The page sends its whole stored history every turn, so only an empty
/// conversation is refused; everything else is forwarded as-is.
pub fn validate_chat_messages(messages: &[Message]) -> Result<(), ApiError> {
    if messages.is_empty() {
        return Err(ApiError::InvalidInput("No messages provided".to_string()));
    }
    Ok(())
}

/// Validate an uploaded file size against the configured limit
pub fn validate_upload_size(size: usize, max_bytes: usize) -> Result<(), ApiError> {
    if size > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "File too large: {} bytes exceeds maximum of {} MB",
            size,
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}
