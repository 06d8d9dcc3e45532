use thiserror::Error;

/// Raised when the option catalog ends up with no usable entries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("the option catalog must contain at least one option")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error(transparent)]
    EmptyCatalog(#[from] CatalogError),
}

/// Failures of the durable stores (tally and blob cache).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),
}

/// Outcome of a rejected control-surface operation.
///
/// `AlreadyVoted`, `NoValidSelections` and `MissingSession` are ordinary
/// user-facing rejections. `Storage` means nothing was applied.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("session has already voted")]
    AlreadyVoted,

    #[error("none of the selected options exist")]
    NoValidSelections,

    #[error("missing session id")]
    MissingSession,

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("survey aggregator is not running")]
    Unavailable,
}

impl SurveyError {
    /// Text safe to hand back to a client. Storage details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            SurveyError::AlreadyVoted => "You have already voted",
            SurveyError::NoValidSelections => "No valid options selected",
            SurveyError::MissingSession => "Missing session id",
            SurveyError::Storage(_) => "Failed to record vote",
            SurveyError::Unavailable => "Survey is temporarily unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_details_are_not_user_facing() {
        let err = SurveyError::from(StorageError::Corrupt("votes row 7".into()));
        assert!(!err.user_message().contains("votes row"));
        assert!(err.to_string().contains("votes row 7"));
    }
}
