use thiserror::Error;

/// Errors that can occur while building vocabularies, reading datasets or
/// running the classifier.
#[derive(Debug, Error)]
pub enum TextCnnError {
    /// Underlying file system failure (missing input, unwritable output).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV reader rejected the input (bad quoting, invalid UTF-8).
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The designated column is not present in the header row.
    #[error("column {column:?} not found in header of {path}")]
    MissingColumn {
        /// Name of the requested column.
        column: String,
        /// File that was searched.
        path: String,
    },

    /// A data row could not be decoded against the schema.
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow {
        /// 1-based line number in the source file.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A binary classification label outside `{0, 1}`.
    #[error("label {0} is not a binary class id")]
    InvalidLabel(i32),

    /// A vocabulary file lists the same token twice.
    #[error("duplicate token {token:?} at vocabulary line {line}")]
    DuplicateToken {
        /// The repeated token.
        token: String,
        /// 1-based line of the second occurrence.
        line: usize,
    },

    /// A vocabulary file has no entries at all.
    #[error("vocabulary file {0} is empty")]
    EmptyVocabulary(String),

    /// Hyper-parameters failed validation.
    #[error("invalid model parameters: {0}")]
    InvalidParams(String),

    /// Serialized parameters or state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("ML backend error: {0}")]
    Candle(String),
}

impl From<candle_core::Error> for TextCnnError {
    fn from(err: candle_core::Error) -> Self {
        TextCnnError::Candle(err.to_string())
    }
}

/// Result type alias for textcnn operations.
pub type Result<T> = std::result::Result<T, TextCnnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TextCnnError::MissingColumn {
            column: "review".into(),
            path: "train.csv".into(),
        };
        assert_eq!(
            err.to_string(),
            "column \"review\" not found in header of train.csv"
        );

        let err = TextCnnError::MalformedRow {
            line: 7,
            reason: "expected 2 fields, found 3".into(),
        };
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TextCnnError>();
    }
}
