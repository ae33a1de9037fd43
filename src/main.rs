use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use wiki_user_export::config::{
    DEFAULT_MYSQL_PORT, DatabaseConfig, ExportConfig, MySqlConfig, OutputConfig, SessionConfig,
    SourceKind, load_field_schema,
};
use wiki_user_export::io::wiki::WikiClient;
use wiki_user_export::model::FieldSchema;
use wiki_user_export::{Result, ToolError, sync};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging().and_then(|()| run(cli)) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Export(args) => execute_export(args),
        Command::CreateAccounts(args) => execute_create_accounts(args),
        Command::Upload(args) => execute_upload(args),
    }
}

fn execute_export(args: ExportArgs) -> Result<()> {
    let config = args.to_config()?;
    let report = sync::export_users_workbook(&config)?;
    println!("{}", report.description_url);
    Ok(())
}

fn execute_create_accounts(args: CreateAccountsArgs) -> Result<()> {
    let accounts = sync::load_accounts(&args.accounts)?;
    let mut client = WikiClient::new(args.wiki.to_session()?)?;
    for username in sync::create_accounts(&mut client, &accounts, args.bot)? {
        println!("{username}");
    }
    Ok(())
}

fn execute_upload(args: UploadArgs) -> Result<()> {
    let mut client = WikiClient::new(args.wiki.to_session()?)?;
    for url in sync::upload_files(&mut client, &args.files)? {
        println!("{url}");
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Export wiki users into an Excel workbook and upload it to the wiki."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the users, build the workbook, save it locally and upload it.
    Export(ExportArgs),
    /// Register the accounts listed in a JSON file.
    CreateAccounts(CreateAccountsArgs),
    /// Upload local files to the wiki.
    Upload(UploadArgs),
}

#[derive(clap::Args)]
struct WikiArgs {
    /// Wiki base URI.
    #[arg(long = "wiki-uri", visible_alias = "w-uri")]
    wiki_uri: String,

    /// Wiki API path, relative to the base URI.
    #[arg(long = "wiki-api-path", visible_alias = "w-api-path", default_value = "/api.php")]
    wiki_api_path: String,

    /// Wiki username.
    #[arg(
        long = "wiki-username",
        visible_aliases = ["w-username", "w-user"],
        default_value = "Admin"
    )]
    wiki_username: String,

    /// Wiki password.
    #[arg(
        long = "wiki-password",
        visible_aliases = ["w-password", "w-pass"],
        env = "WIKI_PASSWORD",
        hide_env_values = true
    )]
    wiki_password: String,

    /// Accept invalid TLS certificates.
    #[arg(long)]
    no_verify_tls: bool,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
}

impl WikiArgs {
    fn to_session(&self) -> Result<SessionConfig> {
        Ok(SessionConfig::new(
            self.wiki_uri.as_str(),
            self.wiki_api_path.as_str(),
            self.wiki_username.as_str(),
            self.wiki_password.as_str(),
        )?
        .with_verify_tls(!self.no_verify_tls)
        .with_timeout(self.timeout.map(Duration::from_secs)))
    }
}

#[derive(clap::Args)]
struct ExportArgs {
    #[command(flatten)]
    wiki: WikiArgs,

    /// Where the user records are read from.
    #[arg(long, value_enum, default_value_t = SourceArg::WikiExport)]
    config_type: SourceArg,

    /// Path to the wiki's SQLite database.
    #[arg(long = "database-path", visible_alias = "db-path", conflicts_with = "database_host")]
    database_path: Option<PathBuf>,

    /// Database host, for a wiki on MySQL.
    #[arg(long = "database-host", visible_alias = "db-host")]
    database_host: Option<String>,

    /// Database port.
    #[arg(long = "database-port", visible_alias = "db-port", default_value_t = DEFAULT_MYSQL_PORT)]
    database_port: u16,

    /// Database name.
    #[arg(long = "database-database", visible_aliases = ["db-database", "db-db"])]
    database_database: Option<String>,

    /// Database username.
    #[arg(long = "database-username", visible_aliases = ["db-username", "db-user"])]
    database_username: Option<String>,

    /// Database password.
    #[arg(
        long = "database-password",
        visible_aliases = ["db-password", "db-pass"],
        env = "DATABASE_PASSWORD",
        hide_env_values = true,
        default_value = ""
    )]
    database_password: String,

    /// Database table prefix.
    #[arg(
        long = "database-table-prefix",
        visible_alias = "db-table-prefix",
        default_value = ""
    )]
    database_table_prefix: String,

    /// Database user table.
    #[arg(
        long = "database-user-table",
        visible_alias = "db-user-table",
        default_value = "user"
    )]
    database_user_table: String,

    /// Name of the file uploaded to the wiki.
    #[arg(long, default_value = "Users.xlsx")]
    users_excel_file_name: String,

    /// Where the workbook is saved locally.
    #[arg(long, default_value = "./Users.xlsx")]
    users_excel_file_path: PathBuf,

    /// JSON file overriding the exported fields and their titles.
    #[arg(long)]
    field_schema: Option<PathBuf>,
}

impl ExportArgs {
    fn to_config(&self) -> Result<ExportConfig> {
        let schema = match &self.field_schema {
            Some(path) => load_field_schema(path)?,
            None => FieldSchema::users(),
        };
        let config = ExportConfig {
            source: self.config_type.into(),
            session: self.wiki.to_session()?,
            database: self.database_config(),
            output: OutputConfig {
                file_name: self.users_excel_file_name.clone(),
                file_path: self.users_excel_file_path.clone(),
            },
            schema,
        };
        config.validate()?;
        Ok(config)
    }

    fn database_config(&self) -> Option<DatabaseConfig> {
        let mut database = match (&self.database_path, &self.database_host) {
            (Some(path), _) => DatabaseConfig::sqlite(path),
            (None, Some(host)) => DatabaseConfig::mysql(MySqlConfig {
                host: host.clone(),
                port: self.database_port,
                database: self.database_database.clone().unwrap_or_default(),
                username: self.database_username.clone().unwrap_or_default(),
                password: self.database_password.clone(),
            }),
            (None, None) => return None,
        };
        database.table_prefix = self.database_table_prefix.clone();
        database.user_table = self.database_user_table.clone();
        Some(database)
    }
}

#[derive(clap::Args)]
struct CreateAccountsArgs {
    #[command(flatten)]
    wiki: WikiArgs,

    /// JSON array of `{username, password, email}` objects.
    accounts: PathBuf,

    /// Add every created account to the bot group.
    #[arg(long)]
    bot: bool,
}

#[derive(clap::Args)]
struct UploadArgs {
    #[command(flatten)]
    wiki: WikiArgs,

    /// Files to upload, each under its own file name.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceArg {
    Database,
    WikiExport,
}

impl From<SourceArg> for SourceKind {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Database => SourceKind::Database,
            SourceArg::WikiExport => SourceKind::WikiExport,
        }
    }
}
