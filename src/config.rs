//! Typed configuration for each component, composed by the export pipeline.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::model::{Field, FieldSchema};

/// Title of the special page that serves the user export.
pub const USER_EXPORT_TITLE: &str = "Special:Userexport";

/// Where the user records are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The wiki's user table, read through a row-query executor.
    Database,
    /// The wiki's CSV user export, read through the authenticated API session.
    WikiExport,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Database => write!(f, "database"),
            SourceKind::WikiExport => write!(f, "wiki-export"),
        }
    }
}

/// Connection settings for the wiki API session.
#[derive(Clone)]
pub struct SessionConfig {
    uri: String,
    api_path: String,
    username: String,
    password: String,
    verify_tls: bool,
    timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(
        uri: impl Into<String>,
        api_path: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let uri = uri.into().trim_end_matches('/').to_string();
        let api_path = api_path.into();
        let username = username.into();

        if uri.is_empty() {
            return Err(ToolError::InvalidConfig("wiki URI must not be empty".into()));
        }
        if !api_path.starts_with('/') {
            return Err(ToolError::InvalidConfig(format!(
                "API path '{api_path}' must start with '/'"
            )));
        }
        if username.is_empty() {
            return Err(ToolError::InvalidConfig(
                "wiki username must not be empty".into(),
            ));
        }

        Ok(Self {
            uri,
            api_path,
            username,
            password: password.into(),
            verify_tls: true,
            timeout: None,
        })
    }

    /// Enables or disables certificate verification.
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Sets a per-request timeout. Without one, requests block until the peer answers.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Full URL of the `api.php` endpoint.
    pub fn api_endpoint(&self) -> String {
        format!("{}{}", self.uri, self.api_path)
    }

    /// Full URL of the user export special page.
    pub fn user_export_uri(&self) -> String {
        format!("{}/index.php/{}", self.uri, USER_EXPORT_TITLE)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("uri", &self.uri)
            .field("api_path", &self.api_path)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Default MySQL server port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Connection settings for a wiki installed with the MySQL backend.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl MySqlConfig {
    fn validate(&self) -> Result<()> {
        let required = [
            ("host", &self.host),
            ("database", &self.database),
            ("username", &self.username),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ToolError::InvalidConfig(format!(
                    "database {name} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the wiki's tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    /// SQLite database file.
    Sqlite(PathBuf),
    /// MySQL or MariaDB server.
    MySql(MySqlConfig),
}

/// Location of the wiki database and its user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub table_prefix: String,
    pub user_table: String,
}

impl DatabaseConfig {
    pub fn new(backend: DatabaseBackend) -> Self {
        Self {
            backend,
            table_prefix: String::new(),
            user_table: "user".to_string(),
        }
    }

    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::new(DatabaseBackend::Sqlite(path.into()))
    }

    pub fn mysql(config: MySqlConfig) -> Self {
        Self::new(DatabaseBackend::MySql(config))
    }

    /// Table name with the configured prefix applied.
    pub fn table_name(&self) -> String {
        format!("{}{}", self.table_prefix, self.user_table)
    }

    pub fn validate(&self) -> Result<()> {
        let table = self.table_name();
        if table.is_empty()
            || !table
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || character == '_')
        {
            return Err(ToolError::InvalidConfig(format!(
                "table name '{table}' must only contain letters, digits and underscores"
            )));
        }
        match &self.backend {
            DatabaseBackend::Sqlite(_) => Ok(()),
            DatabaseBackend::MySql(config) => config.validate(),
        }
    }
}

/// Name of the uploaded file and where the local copy is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub file_name: String,
    pub file_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_name: "Users.xlsx".to_string(),
            file_path: PathBuf::from("./Users.xlsx"),
        }
    }
}

/// Everything one export run needs.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub source: SourceKind,
    pub session: SessionConfig,
    pub database: Option<DatabaseConfig>,
    pub output: OutputConfig,
    pub schema: FieldSchema,
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output.file_name.trim().is_empty() {
            return Err(ToolError::InvalidConfig(
                "output file name must not be empty".into(),
            ));
        }

        match (&self.source, &self.database) {
            (SourceKind::Database, Some(database)) => database.validate(),
            (SourceKind::Database, None) => Err(ToolError::InvalidConfig(
                "database source selected without database settings".into(),
            )),
            (SourceKind::WikiExport, _) => Ok(()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Pairs(Vec<Field>),
    Lists {
        fields: Vec<String>,
        #[serde(default)]
        titles: Option<Vec<String>>,
    },
}

/// Loads a field schema override from a JSON file.
///
/// Accepts either `[{"field": ..., "title": ...}, ...]` or
/// `{"fields": [...], "titles": [...]}`.
pub fn load_field_schema(path: &Path) -> Result<FieldSchema> {
    if !path.exists() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }
    let source = fs::read_to_string(path)?;
    parse_field_schema(&source)
}

fn parse_field_schema(source: &str) -> Result<FieldSchema> {
    match serde_json::from_str(source)? {
        SchemaFile::Pairs(fields) => FieldSchema::from_fields(fields),
        SchemaFile::Lists { fields, titles } => FieldSchema::from_fields_and_titles(fields, titles),
    }
}
