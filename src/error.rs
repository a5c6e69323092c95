use thiserror::Error;

/// Result type alias for disk image operations
pub type Result<T> = std::result::Result<T, ImgError>;

/// Errors that can occur when working with disk images
#[derive(Debug, Error)]
pub enum ImgError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unrecognized image format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Parse error at specific offset
    #[error("Parse error at offset {offset}: {message}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Error message
        message: String,
    },

    /// No geometry could be determined for the image
    #[error("Unrecognized geometry: {0}")]
    UnknownGeometry(String),

    /// Invalid cylinder/head address
    #[error("Invalid track: cylinder {cylinder}, head {head}")]
    InvalidTrack {
        /// Cylinder number
        cylinder: u16,
        /// Head number
        head: u8,
    },

    /// Invalid sector address
    #[error("Invalid sector: id={id} on cylinder {cylinder}, head {head}")]
    InvalidSector {
        /// Cylinder number
        cylinder: u16,
        /// Head number
        head: u8,
        /// Sector ID
        id: u8,
    },

    /// Image is not writable
    #[error("Disk image is not writable")]
    NotWritable,

    /// Filesystem-related error
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    /// File set does not fit any supported volume layout
    #[error("File set of {needed} bytes exceeds every supported disk capacity")]
    CapacityExceeded {
        /// Total bytes required, rounded to cluster granularity
        needed: u64,
    },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImgError {
    /// Create a parse error with context
    pub fn parse<S: Into<String>>(offset: usize, message: S) -> Self {
        ImgError::ParseError {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        ImgError::InvalidFormat(message.into())
    }

    /// Create a filesystem error
    pub fn filesystem<S: Into<String>>(message: S) -> Self {
        ImgError::FileSystemError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImgError::InvalidSector {
            cylinder: 39,
            head: 1,
            id: 10,
        };
        assert_eq!(
            err.to_string(),
            "Invalid sector: id=10 on cylinder 39, head 1"
        );
    }

    #[test]
    fn test_parse_error() {
        let err = ImgError::parse(512, "Bad chunk header");
        assert_eq!(err.to_string(), "Parse error at offset 512: Bad chunk header");
    }
}
