//! Error types for key file loading.

/// Failure while loading a key file.
///
/// Every variant names the file it came from; line-level variants also carry
/// the 1-based line number so the operator can fix the input.
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: missing key blob after type {key_type:?}")]
    MissingBlob {
        file: String,
        line: usize,
        key_type: String,
    },

    #[error("{file}:{line}: invalid base64 key blob: {source}")]
    Decode {
        file: String,
        line: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("{file}:{line}: {reason}")]
    KeyFormat {
        file: String,
        line: usize,
        reason: String,
    },
}

impl KeyFileError {
    /// Name of the file the error was found in.
    pub fn file(&self) -> &str {
        match self {
            Self::Io { file, .. }
            | Self::MissingBlob { file, .. }
            | Self::Decode { file, .. }
            | Self::KeyFormat { file, .. } => file,
        }
    }

    /// Line number, when the error is tied to a single line.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Io { .. } => None,
            Self::MissingBlob { line, .. } | Self::Decode { line, .. } | Self::KeyFormat { line, .. } => {
                Some(*line)
            }
        }
    }
}

/// Failure parsing a single key-file line, before file/line context is known.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("missing key blob after type {0:?}")]
    MissingBlob(String),

    #[error("invalid base64 key blob: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("{0}")]
    KeyFormat(String),
}

impl LineError {
    pub(crate) fn at(self, file: &str, line: usize) -> KeyFileError {
        let file = file.to_string();
        match self {
            Self::MissingBlob(key_type) => KeyFileError::MissingBlob { file, line, key_type },
            Self::Decode(source) => KeyFileError::Decode { file, line, source },
            Self::KeyFormat(reason) => KeyFileError::KeyFormat { file, line, reason },
        }
    }
}
