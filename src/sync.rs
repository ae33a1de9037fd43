//! Orchestration of the export run and the account and upload batches.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::{DatabaseBackend, ExportConfig, OutputConfig, SourceKind};
use crate::error::{Result, ToolError};
use crate::io::archive;
use crate::io::database::{MySqlExecutor, RowQueryExecutor, SqliteExecutor};
use crate::io::excel_write::write_workbook;
use crate::io::source::{DatabaseSource, ExportSource, UserSource};
use crate::io::theme;
use crate::io::wiki::{NewAccount, TokenKind, WikiClient};
use crate::workbook::build_workbook;

/// Group granted to accounts created with the bot flag.
pub const BOT_GROUP: &str = "bot";

/// Steps of an export run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ResolveSource,
    Authenticate,
    FetchRecords,
    BuildWorkbook,
    Serialize,
    PostProcess,
    Persist,
    Upload,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolveSource => "resolve-source",
            Stage::Authenticate => "authenticate",
            Stage::FetchRecords => "fetch-records",
            Stage::BuildWorkbook => "build-workbook",
            Stage::Serialize => "serialize",
            Stage::PostProcess => "post-process",
            Stage::Persist => "persist",
            Stage::Upload => "upload",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub record_count: usize,
    pub output_path: PathBuf,
    pub description_url: String,
}

/// Builds the configured source.
pub fn resolve_source(config: &ExportConfig) -> Result<UserSource> {
    let schema = config.schema.clone();
    match config.source {
        SourceKind::Database => {
            let database = config.database.as_ref().ok_or_else(|| {
                ToolError::InvalidConfig(
                    "database source selected without database settings".into(),
                )
            })?;
            database.validate()?;
            let executor: Box<dyn RowQueryExecutor> = match &database.backend {
                DatabaseBackend::Sqlite(path) => Box::new(SqliteExecutor::new(path)),
                DatabaseBackend::MySql(settings) => Box::new(MySqlExecutor::new(settings.clone())),
            };
            Ok(UserSource::Database(DatabaseSource::new(
                schema,
                database.table_name(),
                executor,
            )))
        }
        SourceKind::WikiExport => Ok(UserSource::WikiExport(ExportSource::new(schema))),
    }
}

/// Runs the whole export: fetch, build, persist locally, then upload.
pub fn export_users_workbook(config: &ExportConfig) -> Result<ExportReport> {
    theme::ensure_applied();
    config.validate()?;

    debug!(stage = %Stage::ResolveSource, source = %config.source);
    let source = resolve_source(config)?;
    let mut client = WikiClient::new(config.session.clone())?;
    run_export(&mut client, &source, &config.output)
}

/// Runs the export stages against an already resolved source and client.
///
/// The workbook is written to disk before the upload starts, so it is left
/// in place when the upload fails.
#[instrument(
    level = "info",
    skip_all,
    fields(source = %source.kind(), output = %output.file_path.display())
)]
pub fn run_export(
    client: &mut WikiClient,
    source: &UserSource,
    output: &OutputConfig,
) -> Result<ExportReport> {
    theme::ensure_applied();

    debug!(stage = %Stage::Authenticate);
    client.login(None, None)?;

    debug!(stage = %Stage::FetchRecords);
    let records = source.fetch_formatted_records(client)?;

    debug!(stage = %Stage::BuildWorkbook);
    let model = build_workbook(source.field_schema(), &records)?;

    debug!(stage = %Stage::Serialize);
    let bytes = write_workbook(&model)?;

    debug!(stage = %Stage::PostProcess, bytes = bytes.len());
    let bytes = archive::post_process(&bytes)?;

    debug!(stage = %Stage::Persist);
    fs::write(&output.file_path, &bytes)?;
    info!(
        record_count = records.len(),
        path = %output.file_path.display(),
        "workbook written"
    );

    debug!(stage = %Stage::Upload);
    let response = client.upload(&output.file_name, bytes, None)?;
    let description_url = description_url(&response)?;
    info!(%description_url, stage = %Stage::Done, "workbook uploaded");

    Ok(ExportReport {
        record_count: records.len(),
        output_path: output.file_path.clone(),
        description_url,
    })
}

/// Extracts `upload.imageinfo.descriptionurl` from an upload reply.
pub fn description_url(response: &Value) -> Result<String> {
    response
        .get("upload")
        .and_then(|upload| upload.get("imageinfo"))
        .and_then(|info| info.get("descriptionurl"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::UploadVerification(response.to_string()))
}

/// Reads a JSON array of `{username, password, email}` objects.
pub fn load_accounts(path: &Path) -> Result<Vec<NewAccount>> {
    if !path.exists() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }
    let source = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&source)?)
}

/// Logs in once and registers every account, optionally granting the bot group.
///
/// Returns the names of the created accounts. The first rejected account stops the batch.
#[instrument(level = "info", skip_all, fields(accounts = accounts.len(), bot = bot))]
pub fn create_accounts(
    client: &mut WikiClient,
    accounts: &[NewAccount],
    bot: bool,
) -> Result<Vec<String>> {
    client.login(None, None)?;

    let mut created = Vec::with_capacity(accounts.len());
    for account in accounts {
        let response = client.create_account(account, None, None)?;
        check_account_created(&account.username, &response)?;
        info!(username = %account.username, "account created");

        if bot {
            let response = client.change_user_groups(&account.username, &[BOT_GROUP], &[], None)?;
            if let Some(error) = response.get("error") {
                return Err(ToolError::Protocol(format!(
                    "could not add {} to {BOT_GROUP}: {error}",
                    account.username
                )));
            }
            debug!(username = %account.username, "added to bot group");
        }
        created.push(account.username.clone());
    }
    Ok(created)
}

fn check_account_created(username: &str, response: &Value) -> Result<()> {
    if let Some(error) = response.get("error") {
        return Err(ToolError::Protocol(format!(
            "account {username} was not created: {error}"
        )));
    }
    let status = response
        .get("createaccount")
        .and_then(|result| result.get("status"))
        .and_then(Value::as_str);
    match status {
        Some("PASS") => Ok(()),
        _ => Err(ToolError::Protocol(format!(
            "account {username} was not created: {response}"
        ))),
    }
}

/// Logs in once and uploads every file under its own file name with one CSRF token.
///
/// Returns the description URL of each upload, in input order.
#[instrument(level = "info", skip_all, fields(files = paths.len()))]
pub fn upload_files(client: &mut WikiClient, paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if !path.is_file() {
            return Err(ToolError::MissingInput(path.clone()));
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ToolError::InvalidFileName(path.clone()))?;
        files.push((path, name));
    }

    client.login(None, None)?;
    let token = client.get_token(TokenKind::Csrf)?;

    let mut urls = Vec::with_capacity(files.len());
    for (path, name) in files {
        let data = fs::read(path)?;
        let response = client.upload(name, data, Some(&token))?;
        let url = description_url(&response)?;
        info!(file = name, %url, "file uploaded");
        urls.push(url);
    }
    Ok(urls)
}
