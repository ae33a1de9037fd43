use chrono::{Datelike, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    DocProperties, ExcelDateTime, Format, Table, TableColumn, TableFunction, TableStyle, Workbook,
};

use crate::error::Result;
use crate::workbook::{
    CellFormat, CellValue, DATE_NUMBER_FORMAT, TEXT_NUMBER_FORMAT, TableStyleName, TotalFunction,
    WorkbookModel,
};

/// Serializes the workbook model into xlsx bytes.
///
/// The container is returned exactly as the writer produced it; see
/// [`archive::post_process`](crate::io::archive::post_process) for the fixes
/// applied before the file is persisted.
pub fn write_workbook(model: &WorkbookModel) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    workbook.set_properties(&DocProperties::new().set_title(&model.title));

    let text_format = Format::new().set_num_format(TEXT_NUMBER_FORMAT);
    let date_format = Format::new().set_num_format(DATE_NUMBER_FORMAT);

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&model.sheet_name)?;

    for (row_idx, row) in model.rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            let (row_num, col_num) = (row_idx as u32, col_idx as u16);
            let format = match cell.format {
                CellFormat::Text => &text_format,
                CellFormat::Date => &date_format,
            };
            match &cell.value {
                CellValue::Text(value) => {
                    worksheet.write_string_with_format(row_num, col_num, value, format)?;
                }
                CellValue::Date(value) => {
                    worksheet.write_datetime_with_format(
                        row_num,
                        col_num,
                        &to_excel_datetime(value)?,
                        format,
                    )?;
                }
                CellValue::Formula(_) | CellValue::Blank => {}
            }
        }
    }

    let columns: Vec<TableColumn> = model
        .table
        .columns
        .iter()
        .map(|column| {
            let mut table_column = TableColumn::new().set_header(&column.header);
            if let Some(label) = &column.total_label {
                table_column = table_column.set_total_label(label);
            }
            if let Some(function) = column.total_function {
                table_column = table_column.set_total_function(table_function(function));
            }
            table_column
        })
        .collect();

    let mut excel_table = Table::new();
    excel_table
        .set_name(&model.table.name)
        .set_style(table_style(model.table.style))
        .set_banded_rows(true)
        .set_autofilter(true)
        .set_total_row(model.table.totals_row_count > 0)
        .set_columns(&columns);

    let region = model.table.region;
    worksheet.add_table(
        region.first_row,
        region.first_col,
        region.last_row,
        region.last_col,
        &excel_table,
    )?;

    // The table writes its own totals; keep the model's cells authoritative.
    if let Some(total_row) = model.rows.last() {
        for (col_idx, cell) in total_row.iter().enumerate() {
            if let CellValue::Formula(formula) = &cell.value {
                worksheet.write_formula(region.last_row, col_idx as u16, formula.as_str())?;
            }
        }
    }

    for (col_idx, width) in model.column_widths.iter().enumerate() {
        worksheet.set_column_width(col_idx as u16, *width)?;
    }

    let (row, col) = model.active_cell;
    worksheet.set_selection(row, col, row, col)?;

    Ok(workbook.save_to_buffer()?)
}

fn to_excel_datetime(value: &NaiveDateTime) -> Result<ExcelDateTime> {
    let (year, month, day) = (value.year() as u16, value.month() as u8, value.day() as u8);
    let datetime = ExcelDateTime::from_ymd(year, month, day)?.and_hms(
        value.hour() as u16,
        value.minute() as u8,
        value.second() as u8,
    )?;
    Ok(datetime)
}

fn table_function(function: TotalFunction) -> TableFunction {
    match function {
        TotalFunction::Count => TableFunction::Count,
    }
}

fn table_style(style: TableStyleName) -> TableStyle {
    match style {
        TableStyleName::Medium2 => TableStyle::Medium2,
    }
}
