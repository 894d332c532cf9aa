/// Result alias that carries the custom [`CdgError`] type.
pub type Result<T> = std::result::Result<T, CdgError>;

/// Common error type for the core crate.
///
/// Decoding and playback never fail; these variants only surface from the
/// edges of the crate (files, configuration and frame export).
#[derive(Debug, thiserror::Error)]
pub enum CdgError {
    /// Free-form message for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A configuration document could not be deserialised.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A configuration value was rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A karaoke archive could not be read.
    #[error("invalid karaoke archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    /// Encoding a rendered frame failed.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] png::EncodingError),
}

impl CdgError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for CdgError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CdgError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_displayed_verbatim() {
        let err = CdgError::from("track is empty");
        assert_eq!(format!("{err}"), "track is empty");
    }

    #[test]
    fn validation_errors_name_the_field() {
        let err = CdgError::InvalidConfig("render.scale must be at least 1");
        assert!(format!("{err}").contains("render.scale"));
    }
}
