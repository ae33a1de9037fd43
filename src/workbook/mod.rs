use chrono::NaiveDateTime;

use crate::error::{Result, ToolError};
use crate::model::{FieldSchema, FieldValue, UserRecord};

/// Document title and worksheet name.
pub const WORKBOOK_TITLE: &str = "Users";
/// Name of the table spanning the user rows.
pub const TABLE_NAME: &str = "User";
/// Label written in the first cell of the total row.
pub const TOTAL_LABEL: &str = "Total";
/// Number format of date cells.
pub const DATE_NUMBER_FORMAT: &str = "yyyy-mm-dd\"T\"hh:mm:ss";
/// Number format of text cells.
pub const TEXT_NUMBER_FORMAT: &str = "@";

/// How a cell is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
    Text,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Text(String),
    Date(NaiveDateTime),
    /// Formula source including the leading `=`.
    Formula(String),
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub value: CellValue,
    pub format: CellFormat,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Self {
            value: CellValue::Text(value.into()),
            format: CellFormat::Text,
        }
    }

    fn blank() -> Self {
        Self {
            value: CellValue::Blank,
            format: CellFormat::Text,
        }
    }

    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => Self::text(text.clone()),
            FieldValue::Date(date) => Self {
                value: CellValue::Date(*date),
                format: CellFormat::Date,
            },
        }
    }
}

/// Aggregations a totals-row column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalFunction {
    /// Counts non-blank visible cells.
    Count,
}

impl TotalFunction {
    /// `SUBTOTAL` function number; the 100 range ignores hidden rows.
    pub fn subtotal_code(self) -> u16 {
        match self {
            TotalFunction::Count => 103,
        }
    }
}

/// Zero-based inclusive cell range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

impl CellRange {
    /// A1-style reference, e.g. `A1:D4`.
    pub fn to_a1(&self) -> String {
        format!(
            "{}{}:{}{}",
            column_name(self.first_col),
            self.first_row + 1,
            column_name(self.last_col),
            self.last_row + 1
        )
    }
}

/// Built-in table styles the user table can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableStyleName {
    /// Blue header with banded rows.
    #[default]
    Medium2,
}

impl TableStyleName {
    /// Name as stored in the table part.
    pub fn name(self) -> &'static str {
        match self {
            TableStyleName::Medium2 => "TableStyleMedium2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub header: String,
    pub total_label: Option<String>,
    pub total_function: Option<TotalFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
    pub name: String,
    pub style: TableStyleName,
    pub columns: Vec<TableColumn>,
    /// Header, data and total rows.
    pub region: CellRange,
    /// Header and data rows; the total row is never filtered.
    pub filter_region: CellRange,
    pub totals_row_count: u32,
}

/// In-memory workbook ready to be serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookModel {
    pub title: String,
    pub sheet_name: String,
    /// Header row, one row per record, then the total row.
    pub rows: Vec<Vec<Cell>>,
    pub table: TableModel,
    pub column_widths: Vec<f64>,
    /// Zero-based `(row, column)` of the selected cell.
    pub active_cell: (u32, u16),
}

impl WorkbookModel {
    pub fn header_row(&self) -> &[Cell] {
        &self.rows[0]
    }

    pub fn data_rows(&self) -> &[Vec<Cell>] {
        &self.rows[1..self.rows.len() - 1]
    }

    pub fn total_row(&self) -> &[Cell] {
        &self.rows[self.rows.len() - 1]
    }
}

/// Lays out the header, one row per record and the total row of the user table.
///
/// Every record must carry a value for each schema field.
pub fn build_workbook(schema: &FieldSchema, records: &[UserRecord]) -> Result<WorkbookModel> {
    if schema.is_empty() {
        return Err(ToolError::InvalidSchema(
            "at least one field is required".to_string(),
        ));
    }

    let titles = schema.titles();
    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(records.len() + 2);
    rows.push(titles.iter().map(|title| Cell::text(*title)).collect());

    for record in records {
        let row = schema
            .iter()
            .map(|entry| {
                record
                    .get(&entry.field)
                    .map(Cell::from_field)
                    .ok_or_else(|| ToolError::MissingField(entry.field.clone()))
            })
            .collect::<Result<Vec<Cell>>>()?;
        rows.push(row);
    }

    let column_widths = autosize_columns(&rows, titles.len());

    let last_index = titles.len() - 1;
    let total_formula = subtotal_formula(TABLE_NAME, titles[last_index], TotalFunction::Count);
    let mut total_row: Vec<Cell> = (0..titles.len()).map(|_| Cell::blank()).collect();
    total_row[0] = Cell::text(TOTAL_LABEL);
    total_row[last_index] = Cell {
        value: CellValue::Formula(total_formula),
        format: CellFormat::Text,
    };
    rows.push(total_row);

    let columns = titles
        .iter()
        .enumerate()
        .map(|(index, title)| TableColumn {
            header: (*title).to_string(),
            total_label: (index == 0 && index != last_index).then(|| TOTAL_LABEL.to_string()),
            total_function: (index == last_index).then_some(TotalFunction::Count),
        })
        .collect();

    let last_col = last_index as u16;
    let total_row_index = (rows.len() - 1) as u32;
    let table = TableModel {
        name: TABLE_NAME.to_string(),
        style: TableStyleName::default(),
        columns,
        region: CellRange {
            first_row: 0,
            first_col: 0,
            last_row: total_row_index,
            last_col,
        },
        filter_region: CellRange {
            first_row: 0,
            first_col: 0,
            last_row: total_row_index - 1,
            last_col,
        },
        totals_row_count: 1,
    };

    Ok(WorkbookModel {
        title: WORKBOOK_TITLE.to_string(),
        sheet_name: WORKBOOK_TITLE.to_string(),
        rows,
        table,
        column_widths,
        active_cell: (total_row_index + 1, 0),
    })
}

/// `SUBTOTAL` formula over a whole table column, as a structured reference.
pub fn subtotal_formula(table: &str, column: &str, function: TotalFunction) -> String {
    format!(
        "=SUBTOTAL({},{}[{}])",
        function.subtotal_code(),
        table,
        escape_column_specifier(column)
    )
}

/// Spreadsheet column letters for a zero-based index: 0 → `A`, 26 → `AA`.
pub fn column_name(index: u16) -> String {
    let mut remaining = u32::from(index) + 1;
    let mut letters = Vec::new();
    while remaining > 0 {
        let offset = ((remaining - 1) % 26) as u8;
        letters.push(char::from(b'A' + offset));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

// Characters with a meaning inside structured references are quoted with `'`.
fn escape_column_specifier(column: &str) -> String {
    let mut escaped = String::with_capacity(column.len());
    for character in column.chars() {
        if matches!(character, '[' | ']' | '#' | '\'') {
            escaped.push('\'');
        }
        escaped.push(character);
    }
    escaped
}

fn autosize_columns(rows: &[Vec<Cell>], column_count: usize) -> Vec<f64> {
    (0..column_count)
        .map(|column| {
            rows.iter()
                .filter_map(|row| row.get(column))
                .map(|cell| rendered_len(&cell.value))
                .max()
                .unwrap_or(0) as f64
        })
        .collect()
}

fn rendered_len(value: &CellValue) -> usize {
    match value {
        CellValue::Text(text) | CellValue::Formula(text) => text.chars().count(),
        CellValue::Date(date) => FieldValue::Date(*date).render().chars().count(),
        CellValue::Blank => 0,
    }
}
