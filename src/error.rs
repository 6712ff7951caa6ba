use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Duplicate key in {collection}: {id}")]
    DuplicateKey { collection: String, id: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store is locked for maintenance by {holder} since {since}")]
    Locked { holder: String, since: String },

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Serialization(_) => -2,
            Error::CollectionNotFound(_) => -3,
            Error::DuplicateKey { .. } => -4,
            Error::InvalidDocument(_) => -5,
            Error::InvalidUpdate(_) => -6,
            Error::Config(_) => -7,
            Error::Parse(_) => -8,
            Error::Locked { .. } => -9,
            Error::Migration(_) => -10,
            Error::Validation(_) => -11,
            Error::Storage(_) => -12,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_error_codes_are_distinct_and_contiguous() {
        let errors = [
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")),
            Error::Serialization(String::new()),
            Error::CollectionNotFound(String::new()),
            Error::DuplicateKey {
                collection: String::new(),
                id: String::new(),
            },
            Error::InvalidDocument(String::new()),
            Error::InvalidUpdate(String::new()),
            Error::Config(String::new()),
            Error::Parse(String::new()),
            Error::Locked {
                holder: String::new(),
                since: String::new(),
            },
            Error::Migration(String::new()),
            Error::Validation(String::new()),
            Error::Storage(String::new()),
        ];
        let codes: BTreeSet<i32> = errors.iter().map(Error::error_code).collect();
        assert_eq!(codes, (-12..=-1).collect());
    }
}
