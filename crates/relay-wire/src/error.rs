use std::fmt;

/// Errors raised while encoding, decoding, or building envelope headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// `encode` was asked to serialize a message with an empty sender.
    EmptySender,
    /// `decode` was given fewer than the 4 required frames.
    TooFewFrames { got: usize },
    /// A header field had the wrong length.
    BadHeader { field: &'static str, expected: usize, got: usize },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::EmptySender => write!(f, "cannot encode a message with an empty sender"),
            WireError::TooFewFrames { got } => {
                write!(f, "expected at least 4 frames, got {got}")
            }
            WireError::BadHeader { field, expected, got } => {
                write!(f, "bad header field `{field}`: expected {expected} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for WireError {}
