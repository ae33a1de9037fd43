//! Record formatting shared by every data source.
//!
//! Wiki timestamps are stored as fourteen digits (`YYYYMMDDhhmmss`). The
//! formatter turns the registration timestamp of each record into a
//! canonical date and leaves every other field textual.

use chrono::NaiveDateTime;

use crate::error::{Result, ToolError};
use crate::model::{FieldValue, RawRecord, UserRecord};

/// Field holding the account registration timestamp.
pub const REGISTRATION_FIELD: &str = "user_registration";

/// Wire format of wiki timestamps.
pub const WIKI_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const WIKI_TIMESTAMP_LEN: usize = 14;

/// Parses a wiki timestamp into a canonical date.
pub fn parse_wiki_timestamp(field: &str, value: &str) -> Result<NaiveDateTime> {
    let invalid = || ToolError::Format {
        field: field.to_string(),
        value: value.to_string(),
    };

    if value.len() != WIKI_TIMESTAMP_LEN || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid());
    }

    NaiveDateTime::parse_from_str(value, WIKI_TIMESTAMP_FORMAT).map_err(|_| invalid())
}

/// Formats one raw record. A malformed registration timestamp fails the record.
pub fn format_record(raw: RawRecord) -> Result<UserRecord> {
    raw.into_iter()
        .map(|(field, value)| {
            let value = if field == REGISTRATION_FIELD {
                FieldValue::Date(parse_wiki_timestamp(&field, &value)?)
            } else {
                FieldValue::Text(value)
            };
            Ok((field, value))
        })
        .collect()
}

/// Formats every record, failing the whole batch on the first bad record.
pub fn format_records(raw: Vec<RawRecord>) -> Result<Vec<UserRecord>> {
    raw.into_iter().map(format_record).collect()
}
