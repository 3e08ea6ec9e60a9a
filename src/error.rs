//! Error types for voxchat.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxchatError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio ingest errors
    #[error("Malformed audio payload: {message}")]
    MalformedAudio { message: String },

    // Recognition errors
    #[error("Recognition timed out for utterance {utterance_id} after {attempts} attempt(s)")]
    RecognitionTimeout { utterance_id: u64, attempts: u32 },

    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    // Generation errors
    #[error("Generation failed: {message}")]
    Generation { message: String },

    // Synthesis errors
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    // Session lifecycle
    #[error("Session is closed")]
    SessionClosed,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxchatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoxchatError::ConfigInvalidValue {
            key: "segmenter.speech_threshold".to_string(),
            message: "must be within (0.0, 1.0]".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for segmenter.speech_threshold: must be within (0.0, 1.0]"
        );
    }

    #[test]
    fn test_malformed_audio_display() {
        let error = VoxchatError::MalformedAudio {
            message: "payload length 17 is not sample-aligned".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed audio payload: payload length 17 is not sample-aligned"
        );
    }

    #[test]
    fn test_recognition_timeout_display() {
        let error = VoxchatError::RecognitionTimeout {
            utterance_id: 3,
            attempts: 2,
        };
        assert_eq!(
            error.to_string(),
            "Recognition timed out for utterance 3 after 2 attempt(s)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: VoxchatError = io.into();
        assert!(matches!(error, VoxchatError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("not [ valid").unwrap_err();
        let error: VoxchatError = toml_err.into();
        assert!(matches!(error, VoxchatError::Config(_)));
    }
}
