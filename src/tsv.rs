//! Tab-delimited tables with row identifiers in the first column.

use std::fmt::Display;
use std::io::{Read, Write};
use std::str::FromStr;

use csv::{ReaderBuilder, WriterBuilder};
use ndarray::Array2;

use crate::error::CompendiumError;
use crate::table::MetadataTable;

fn parse_error(name: &str, message: impl ToString) -> CompendiumError {
    CompendiumError::TableParse {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn writer<W: Write>(sink: W) -> csv::Writer<W> {
    WriterBuilder::new().delimiter(b'\t').from_writer(sink)
}

fn reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .from_reader(source)
}

/// Missing cells are written as empty fields.
pub fn write_table<W: Write>(sink: W, table: &MetadataTable) -> Result<(), CompendiumError> {
    let name = table.index_name().to_string();
    let mut out = writer(sink);
    let mut header = vec![table.index_name()];
    header.extend(table.columns().iter().map(String::as_str));
    out.write_record(&header).map_err(|err| parse_error(&name, err))?;
    for row in table.rows() {
        let mut record = vec![row.id()];
        record.extend(
            table
                .row_values(row.position())
                .iter()
                .map(|value| value.as_deref().unwrap_or("")),
        );
        out.write_record(&record).map_err(|err| parse_error(&name, err))?;
    }
    out.flush().map_err(|err| parse_error(&name, err))?;
    Ok(())
}

/// Empty fields are read back as missing.
pub fn read_table<R: Read>(source: R, name: &str) -> Result<MetadataTable, CompendiumError> {
    let mut input = reader(source);
    let headers = input.headers().map_err(|err| parse_error(name, err))?.clone();
    let mut fields = headers.iter();
    let index_name = fields
        .next()
        .ok_or_else(|| parse_error(name, "missing header"))?;
    let columns = fields.map(str::to_string).collect::<Vec<_>>();
    let mut table = MetadataTable::new(index_name, columns);
    for record in input.records() {
        let record = record.map_err(|err| parse_error(name, err))?;
        let mut cells = record.iter();
        let id = cells
            .next()
            .ok_or_else(|| parse_error(name, "empty record"))?;
        let values = cells
            .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
            .collect();
        table.push_row(id, values)?;
    }
    Ok(table)
}

pub fn write_matrix<W: Write, T: Display>(
    sink: W,
    index_name: &str,
    row_ids: &[String],
    col_ids: &[String],
    matrix: &Array2<T>,
) -> Result<(), CompendiumError> {
    if matrix.dim() != (row_ids.len(), col_ids.len()) {
        return Err(CompendiumError::ShapeMismatch(format!(
            "matrix {:?} does not match {} row and {} column identifiers",
            matrix.dim(),
            row_ids.len(),
            col_ids.len()
        )));
    }
    let mut out = writer(sink);
    let mut header = vec![index_name.to_string()];
    header.extend(col_ids.iter().cloned());
    out.write_record(&header)
        .map_err(|err| parse_error(index_name, err))?;
    for (id, row) in row_ids.iter().zip(matrix.rows()) {
        let mut record = Vec::with_capacity(col_ids.len() + 1);
        record.push(id.clone());
        record.extend(row.iter().map(|value| value.to_string()));
        out.write_record(&record)
            .map_err(|err| parse_error(index_name, err))?;
    }
    out.flush().map_err(|err| parse_error(index_name, err))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelledMatrix<T> {
    pub index_name: String,
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    pub values: Array2<T>,
}

pub fn read_matrix<R: Read, T>(source: R, name: &str) -> Result<LabelledMatrix<T>, CompendiumError>
where
    T: FromStr,
    T::Err: Display,
{
    let mut input = reader(source);
    let headers = input.headers().map_err(|err| parse_error(name, err))?.clone();
    let mut fields = headers.iter();
    let index_name = fields
        .next()
        .ok_or_else(|| parse_error(name, "missing header"))?
        .to_string();
    let col_ids = fields.map(str::to_string).collect::<Vec<_>>();

    let mut row_ids = Vec::new();
    let mut values = Vec::new();
    for record in input.records() {
        let record = record.map_err(|err| parse_error(name, err))?;
        let mut cells = record.iter();
        let id = cells
            .next()
            .ok_or_else(|| parse_error(name, "empty record"))?;
        row_ids.push(id.to_string());
        for cell in cells {
            let value = cell
                .parse::<T>()
                .map_err(|err| parse_error(name, format!("row {id}: {err}")))?;
            values.push(value);
        }
    }
    let values = Array2::from_shape_vec((row_ids.len(), col_ids.len()), values)
        .map_err(|err| parse_error(name, err))?;
    Ok(LabelledMatrix {
        index_name,
        row_ids,
        col_ids,
        values,
    })
}
