use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ToolError};

pub mod timestamp;

/// Record as delivered by a data source, before any field is parsed.
pub type RawRecord = BTreeMap<String, String>;

/// Record after formatting; immutable once produced.
pub type UserRecord = BTreeMap<String, FieldValue>;

/// Rendering used for dates wherever a textual form is needed.
pub const DATE_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_USER_FIELDS: [(&str, &str); 4] = [
    ("user_name", "Username"),
    ("user_real_name", "Real name"),
    ("user_email", "Email"),
    ("user_registration", "Registration date"),
];

/// A single column of the export: the source field and its display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub field: String,
    pub title: String,
}

/// Ordered field name → title mapping shared by every data source.
///
/// The order of the fields is the column order of the workbook and the
/// projection order of the relational query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<Field>,
}

impl FieldSchema {
    /// Builds a schema from ordered `(field, title)` pairs.
    pub fn new<I, F, T>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<String>,
        T: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(field, title)| Field {
                field: field.into(),
                title: title.into(),
            })
            .collect();
        Self::from_fields(fields)
    }

    /// Builds a schema from already paired entries, validating them.
    pub fn from_fields(fields: Vec<Field>) -> Result<Self> {
        if fields.is_empty() {
            return Err(ToolError::InvalidSchema(
                "at least one field is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &fields {
            if !is_identifier(&entry.field) {
                return Err(ToolError::InvalidSchema(format!(
                    "field name '{}' must only contain letters, digits and underscores",
                    entry.field
                )));
            }
            if !seen.insert(entry.field.as_str()) {
                return Err(ToolError::InvalidSchema(format!(
                    "duplicate field '{}'",
                    entry.field
                )));
            }
        }

        Ok(Self { fields })
    }

    /// Builds a schema from a field list and an optional title list.
    ///
    /// Missing titles fall back to the field name; surplus titles are ignored.
    pub fn from_fields_and_titles(
        fields: Vec<String>,
        titles: Option<Vec<String>>,
    ) -> Result<Self> {
        let titles = titles.unwrap_or_else(|| fields.clone());

        if fields.len() > titles.len() {
            warn!(
                fields = fields.len(),
                titles = titles.len(),
                "there are more fields than titles"
            );
        } else if titles.len() > fields.len() {
            warn!(
                fields = fields.len(),
                titles = titles.len(),
                "there are more titles than fields"
            );
        }

        let pairs: Vec<Field> = fields
            .iter()
            .enumerate()
            .map(|(index, field)| Field {
                field: field.clone(),
                title: titles.get(index).unwrap_or(field).clone(),
            })
            .collect();

        Self::from_fields(pairs)
    }

    /// The wiki user columns exported when no override is configured.
    pub fn users() -> Self {
        Self {
            fields: DEFAULT_USER_FIELDS
                .iter()
                .map(|(field, title)| Field {
                    field: (*field).to_string(),
                    title: (*title).to_string(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Field names in column order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|entry| entry.field.as_str()).collect()
    }

    /// Display titles in column order.
    pub fn titles(&self) -> Vec<&str> {
        self.fields.iter().map(|entry| entry.title.as_str()).collect()
    }
}

/// Value held by a formatted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Textual value. Numeric-looking strings stay textual.
    Text(String),
    /// Canonical date parsed from a source timestamp.
    Date(NaiveDateTime),
}

impl FieldValue {
    /// Textual rendering used for sizing and display.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(value) => value.clone(),
            FieldValue::Date(value) => value.format(DATE_DISPLAY_FORMAT).to_string(),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_')
}
