//! The two interchangeable places user records are read from.

use tracing::{debug, info, instrument};

use crate::config::{SourceKind, USER_EXPORT_TITLE};
use crate::error::{Result, ToolError};
use crate::io::database::RowQueryExecutor;
use crate::io::wiki::{TokenKind, WikiClient};
use crate::model::timestamp::format_records;
use crate::model::{FieldSchema, RawRecord, UserRecord};

/// Reads users from the wiki's user table.
pub struct DatabaseSource {
    schema: FieldSchema,
    table: String,
    executor: Box<dyn RowQueryExecutor>,
}

impl DatabaseSource {
    pub fn new(
        schema: FieldSchema,
        table: impl Into<String>,
        executor: Box<dyn RowQueryExecutor>,
    ) -> Self {
        Self {
            schema,
            table: table.into(),
            executor,
        }
    }

    /// Read-only projection of exactly the schema fields, in schema order.
    pub fn query(&self) -> String {
        format!(
            "select {} from `{}`;",
            self.schema.field_names().join(", "),
            self.table
        )
    }

    pub fn fetch_raw_records(&self) -> Result<Vec<RawRecord>> {
        self.executor.query(&self.query())
    }
}

/// Reads users from the wiki's CSV user export.
pub struct ExportSource {
    schema: FieldSchema,
}

impl ExportSource {
    pub fn new(schema: FieldSchema) -> Self {
        Self { schema }
    }

    /// Requests the CSV export, reusing the session's CSRF token.
    pub fn fetch_users_csv(&self, client: &mut WikiClient, token: Option<&str>) -> Result<Vec<u8>> {
        let token = match token {
            Some(token) => token.to_string(),
            None => client.get_token(TokenKind::Csrf)?,
        };
        let uri = client.config().user_export_uri();
        client.post_form_bytes(
            &uri,
            &[
                ("title", USER_EXPORT_TITLE),
                ("exportusers", "1"),
                ("token", token.as_str()),
                ("wpEditToken", token.as_str()),
            ],
        )
    }

    pub fn fetch_raw_records(&self, client: &mut WikiClient) -> Result<Vec<RawRecord>> {
        let data = self.fetch_users_csv(client, None)?;
        debug!(bytes = data.len(), "received user export");
        parse_users_csv(&self.schema, data)
    }
}

/// Parses the export body. Its header must list the schema fields in order.
pub fn parse_users_csv(schema: &FieldSchema, data: Vec<u8>) -> Result<Vec<RawRecord>> {
    let text = String::from_utf8(data).map_err(|error| ToolError::MalformedResponse {
        context: "user export is not valid UTF-8".to_string(),
        payload: String::from_utf8_lossy(error.as_bytes()).into_owned(),
    })?;
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let expected = schema.field_names();
    if headers != expected {
        return Err(ToolError::SchemaMismatch {
            expected: expected.into_iter().map(str::to_string).collect(),
            found: headers,
        });
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record: RawRecord = headers
            .iter()
            .cloned()
            .zip(row.iter().map(str::to_string))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// A configured data source, dispatched on [`SourceKind`].
pub enum UserSource {
    Database(DatabaseSource),
    WikiExport(ExportSource),
}

impl UserSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            UserSource::Database(_) => SourceKind::Database,
            UserSource::WikiExport(_) => SourceKind::WikiExport,
        }
    }

    pub fn field_schema(&self) -> &FieldSchema {
        match self {
            UserSource::Database(source) => &source.schema,
            UserSource::WikiExport(source) => &source.schema,
        }
    }

    /// Fetches records as the source delivers them. The database variant ignores the client.
    pub fn fetch_raw_records(&self, client: &mut WikiClient) -> Result<Vec<RawRecord>> {
        match self {
            UserSource::Database(source) => source.fetch_raw_records(),
            UserSource::WikiExport(source) => source.fetch_raw_records(client),
        }
    }

    /// Fetches and formats records; any unparseable record fails the fetch.
    #[instrument(level = "info", skip_all, fields(source = %self.kind()))]
    pub fn fetch_formatted_records(&self, client: &mut WikiClient) -> Result<Vec<UserRecord>> {
        let raw = self.fetch_raw_records(client)?;
        info!(record_count = raw.len(), "fetched user records");
        format_records(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;

    struct StaticRows(Vec<RawRecord>);

    impl RowQueryExecutor for StaticRows {
        fn query(&self, _sql: &str) -> Result<Vec<RawRecord>> {
            Ok(self.0.clone())
        }
    }

    fn schema() -> FieldSchema {
        FieldSchema::new([
            ("user_name", "Username"),
            ("user_registration", "Registration date"),
        ])
        .expect("schema")
    }

    #[test]
    fn database_query_projects_schema_fields_in_order() {
        let source =
            DatabaseSource::new(FieldSchema::users(), "mw_user", Box::new(StaticRows(vec![])));
        assert_eq!(
            source.query(),
            "select user_name, user_real_name, user_email, user_registration from `mw_user`;"
        );
    }

    #[test]
    fn database_rows_are_formatted() {
        let row: RawRecord = [
            ("user_name".to_string(), "Alice".to_string()),
            ("user_registration".to_string(), "20200101000000".to_string()),
        ]
        .into_iter()
        .collect();
        let source = UserSource::Database(DatabaseSource::new(
            schema(),
            "user",
            Box::new(StaticRows(vec![row])),
        ));
        let config = crate::config::SessionConfig::new("http://127.0.0.1:1", "/api.php", "a", "b")
            .expect("session config");
        let mut client = WikiClient::new(config).expect("client");

        let records = source.fetch_formatted_records(&mut client).expect("records");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["user_name"], FieldValue::Text("Alice".into()));
        assert!(matches!(records[0]["user_registration"], FieldValue::Date(_)));
    }

    #[test]
    fn export_csv_maps_columns_to_fields() {
        let body = "user_name,user_registration\n\"Smith, Alice\",20200101000000\nBob,20200102000000\n";
        let records = parse_users_csv(&schema(), body.as_bytes().to_vec()).expect("parsed");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["user_name"], "Smith, Alice");
        assert_eq!(records[1]["user_registration"], "20200102000000");
    }

    #[test]
    fn export_header_with_wrong_names_is_a_mismatch() {
        let body = "user_registration,user_name\n20200101000000,Alice\n";
        let error = parse_users_csv(&schema(), body.as_bytes().to_vec()).unwrap_err();
        assert!(matches!(error, ToolError::SchemaMismatch { .. }));
    }

    #[test]
    fn export_header_with_extra_column_is_a_mismatch() {
        let body = "user_name,user_registration,user_email\nAlice,20200101000000,a@b.c\n";
        let error = parse_users_csv(&schema(), body.as_bytes().to_vec()).unwrap_err();
        assert!(
            matches!(error, ToolError::SchemaMismatch { ref found, .. } if found.len() == 3)
        );
    }

    #[test]
    fn export_with_byte_order_mark_is_accepted() {
        let body = "\u{feff}user_name,user_registration\nAlice,20200101000000\n";
        let records = parse_users_csv(&schema(), body.as_bytes().to_vec()).expect("parsed");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn export_that_is_not_utf8_is_malformed() {
        let error = parse_users_csv(&schema(), vec![0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(error, ToolError::MalformedResponse { .. }));
    }
}
