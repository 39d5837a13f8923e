// Channel-name validation: channel names double as relay file names, so they
// must be a single safe path component.

use thiserror::Error;

/// Maximum allowed channel name length in bytes.
const MAX_CHANNEL_BYTES: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelNameError {
    #[error("channel name is empty")]
    Empty,

    #[error("channel name exceeds maximum length of {MAX_CHANNEL_BYTES} bytes")]
    TooLong,

    #[error("channel name contains null byte")]
    NullByte,

    #[error("channel name contains a path separator")]
    Separator,

    #[error("channel name is a traversal component: {0}")]
    Traversal(String),

    #[error("channel name is whitespace only")]
    Whitespace,
}

/// Validate a channel name for use as a single file name on the relay.
///
/// Names are returned unchanged when valid; nothing is normalized so clients
/// and relay agree on the exact channel identity.
pub fn validate_channel_name(name: &str) -> Result<&str, ChannelNameError> {
    if name.is_empty() {
        return Err(ChannelNameError::Empty);
    }
    if name.contains('\0') {
        return Err(ChannelNameError::NullByte);
    }
    if name.len() > MAX_CHANNEL_BYTES {
        return Err(ChannelNameError::TooLong);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ChannelNameError::Separator);
    }
    if name == "." || name == ".." {
        return Err(ChannelNameError::Traversal(name.to_string()));
    }
    if name.trim().is_empty() {
        return Err(ChannelNameError::Whitespace);
    }
    Ok(name)
}
