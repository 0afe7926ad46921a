use crate::restore::PrecheckResults;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad grouping of failures, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Lookup,
    Semantic,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No admin account was found")]
    NoAdmin,

    #[error("{0}")]
    Usage(String),

    #[error("Cannot read {}", .0.display())]
    ArchiveUnreadable(PathBuf),

    #[error("From must be a file: {}", .0.display())]
    ArchiveNotFile(PathBuf),

    #[error("Not a course archive: {}", .0.display())]
    UnsupportedArchive(PathBuf),

    #[error("No course metadata found in {}", .0.display())]
    MetadataNotFound(PathBuf),

    #[error("No backup found in {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("Course {0} not found")]
    CourseNotFound(i64),

    #[error("Category {0} not found")]
    CategoryNotFound(i64),

    #[error("Invalid type specified: {0}")]
    InvalidMergeMode(String),

    #[error("No shortname in the backup file.")]
    MissingShortName,

    #[error("Failed restore pre-check: {}", .0.errors.join("; "))]
    PrecheckFailed(PrecheckResults),

    #[error("Cannot {action} while restore is {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Archive entry escapes the extraction directory: {0}")]
    UnsafeArchiveEntry(String),

    #[error("Malformed course metadata: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoAdmin
            | Error::Usage(_)
            | Error::ArchiveUnreadable(_)
            | Error::ArchiveNotFile(_)
            | Error::MetadataNotFound(_)
            | Error::BackupNotFound(_) => ErrorKind::Precondition,
            Error::CourseNotFound(_) | Error::CategoryNotFound(_) => ErrorKind::Lookup,
            Error::InvalidMergeMode(_)
            | Error::MissingShortName
            | Error::PrecheckFailed(_)
            | Error::InvalidState { .. }
            | Error::UnsafeArchiveEntry(_)
            | Error::UnsupportedArchive(_)
            | Error::Metadata(_) => ErrorKind::Semantic,
            Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Internal(e.into())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Internal(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.into())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Metadata(e.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
    }
}
