use std::path::PathBuf;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Row};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::config::MySqlConfig;
use crate::error::Result;
use crate::model::RawRecord;

/// Runs a read-only query and hands back every row as a column → text mapping.
pub trait RowQueryExecutor {
    fn query(&self, sql: &str) -> Result<Vec<RawRecord>>;
}

/// Executor over a wiki installed with the SQLite backend.
///
/// A connection is opened for every query and closed when it goes out of
/// scope, including when the query fails.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: PathBuf,
}

impl SqliteExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RowQueryExecutor for SqliteExecutor {
    fn query(&self, sql: &str) -> Result<Vec<RawRecord>> {
        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut statement = connection.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = statement.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = RawRecord::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), value_to_text(row.get_ref(index)?));
            }
            records.push(record);
        }

        debug!(rows = records.len(), path = %self.path.display(), "query finished");
        Ok(records)
    }
}

/// Executor over a wiki installed with the MySQL backend.
///
/// Like [`SqliteExecutor`], each query gets its own connection.
#[derive(Debug, Clone)]
pub struct MySqlExecutor {
    config: MySqlConfig,
}

impl MySqlExecutor {
    pub fn new(config: MySqlConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> Opts {
        let config = &self.config;
        OptsBuilder::new()
            .ip_or_hostname(Some(config.host.as_str()))
            .tcp_port(config.port)
            .db_name(Some(config.database.as_str()))
            .user(Some(config.username.as_str()))
            .pass(Some(config.password.as_str()))
            .into()
    }
}

impl RowQueryExecutor for MySqlExecutor {
    fn query(&self, sql: &str) -> Result<Vec<RawRecord>> {
        let mut connection = Conn::new(self.options())?;
        let rows: Vec<Row> = connection.query(sql)?;

        let records: Vec<RawRecord> = rows
            .iter()
            .map(|row| {
                row.columns_ref()
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        let value = row.as_ref(index).map(mysql_value_to_text).unwrap_or_default();
                        (column.name_str().into_owned(), value)
                    })
                    .collect()
            })
            .collect();

        debug!(rows = records.len(), host = %self.config.host, "query finished");
        Ok(records)
    }
}

// Dates come back in the wiki's 14-digit timestamp layout.
fn mysql_value_to_text(value: &mysql::Value) -> String {
    use mysql::Value;

    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, _) => {
            format!("{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}")
        }
        Value::Time(negative, days, hours, minutes, seconds, _) => {
            let sign = if *negative { "-" } else { "" };
            let hours = days * 24 + u32::from(*hours);
            format!("{sign}{hours}:{minutes:02}:{seconds:02}")
        }
    }
}

fn value_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
