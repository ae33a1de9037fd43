use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the different failure cases that can occur while the
/// tool fetches users, builds the workbook, or talks to the wiki.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors raised while reading or rewriting the workbook container.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Errors raised by the row-query executor.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors raised by the MySQL row-query executor.
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql::Error),

    /// Raised when the user export cannot be read as CSV.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Transport failure: the request never produced a response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A response arrived but is not in the expected structured format.
    #[error("malformed response from {context}: {payload}")]
    MalformedResponse { context: String, payload: String },

    /// A response parsed fine but lacks a field the protocol requires.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The wiki explicitly rejected the credentials or token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Raised when the export columns do not line up with the field schema.
    #[error("export columns {found:?} do not match field schema {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Raised when a record field cannot be parsed into its canonical type.
    #[error("invalid value '{value}' for field {field}")]
    Format { field: String, value: String },

    /// Raised when a record does not supply a value for a schema field.
    #[error("record is missing field {0}")]
    MissingField(String),

    /// The upload went through but the wiki did not confirm it.
    #[error("upload was not confirmed: {0}")]
    UploadVerification(String),

    /// Raised when a field schema is empty, duplicated, or otherwise unusable.
    #[error("invalid field schema: {0}")]
    InvalidSchema(String),

    /// Raised when configuration values fail validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when a file to upload has no UTF-8 file name to upload it under.
    #[error("file name of {0} is not valid UTF-8")]
    InvalidFileName(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
