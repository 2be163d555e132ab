//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response is shorter than the smallest well-formed frame
    #[error("Response too short: {len} bytes (min: {min})")]
    TooShort { len: usize, min: usize },

    /// Negotiation response did not carry enough comma-separated fields
    #[error("Missing field: expected {expected} fields, got {actual}")]
    MissingField { expected: usize, actual: usize },

    /// A field could not be parsed as a decimal integer
    #[error("Invalid field {index}: {value:?} is not a decimal integer")]
    InvalidField { index: usize, value: String },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::TooShort { len: 4, min: 10 };
        let msg = format!("{}", err);
        assert!(msg.contains("too short"));
        assert!(msg.contains("4 bytes"));
    }

    #[test]
    fn test_invalid_field_display() {
        let err = ProtocolError::InvalidField {
            index: 3,
            value: "24x0".to_string(),
        };
        assert!(err.to_string().contains("\"24x0\""));
    }
}
