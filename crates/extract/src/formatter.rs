use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::FormattingError;
use crate::schema::SchemaContract;
use crate::value::FieldValue;

/// One extracted record, keyed by column name in column order.
pub type Row = IndexMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl TabularResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Field -> value mapping of the first record
    pub fn fields(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// A formatted answer plus the payload it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub table: TabularResult,
    pub raw: Value,
}

impl ExtractionResult {
    pub fn fields(&self) -> Option<&Row> {
        self.table.fields()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    pretty: bool,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl ResponseFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { pretty: false }
    }

    /// Shape a payload into rows. With a schema, columns follow the schema
    /// and values are coerced to the declared types; without one, the
    /// payload's keys pass through as-is.
    pub fn to_table(
        &self,
        raw: &Value,
        schema: Option<&SchemaContract>,
    ) -> Result<TabularResult, FormattingError> {
        let records: Vec<&Map<String, Value>> = match raw {
            Value::Object(map) => vec![map],
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    item.as_object().ok_or_else(|| {
                        FormattingError::UnsupportedPayload(format!(
                            "item {i} is {}, expected an object",
                            kind(item)
                        ))
                    })
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(FormattingError::UnsupportedPayload(format!(
                    "got {}, expected an object or a list of objects",
                    kind(other)
                )));
            }
        };

        match schema {
            Some(contract) => shape_with_schema(&records, contract),
            None => Ok(shape_inferred(&records)),
        }
    }

    /// One record exports as an object, anything else as an array of objects.
    pub fn to_json_bytes(&self, table: &TabularResult) -> Result<Vec<u8>, FormattingError> {
        match table.rows.as_slice() {
            [row] => self.write_json(row),
            rows => self.write_json(&rows),
        }
    }

    pub fn to_raw_json_bytes(&self, raw: &Value) -> Result<Vec<u8>, FormattingError> {
        self.write_json(raw)
    }

    pub fn to_csv_bytes(&self, table: &TabularResult) -> Result<Vec<u8>, FormattingError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&table.columns)?;

        for row in &table.rows {
            let cells: Vec<String> = table
                .columns
                .iter()
                .map(|col| row.get(col).map(ToString::to_string).unwrap_or_default())
                .collect();
            writer.write_record(&cells)?;
        }

        writer
            .into_inner()
            .map_err(|e| FormattingError::Csv(e.into_error().into()))
    }

    /// Pipe-style Markdown table for chat display
    pub fn to_markdown(&self, table: &TabularResult) -> String {
        if table.columns.is_empty() || table.rows.is_empty() {
            return String::new();
        }

        let cells: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .map(|col| {
                        row.get(col)
                            .map(|v| escape_cell(&v.to_string()))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        let numeric: Vec<bool> = table
            .columns
            .iter()
            .map(|col| {
                let mut values = table.rows.iter().filter_map(|r| r.get(col)).filter(|v| !v.is_null());
                let mut any = false;
                let all = values.all(|v| {
                    any = true;
                    v.is_numeric()
                });
                any && all
            })
            .collect();

        let widths: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain([escape_cell(col).chars().count(), 3])
                    .max()
                    .unwrap_or(3)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = table.columns.iter().map(|c| escape_cell(c)).collect();
        push_line(&mut out, &header, &widths, &numeric);

        let separator: Vec<String> = widths
            .iter()
            .zip(&numeric)
            .map(|(w, right)| {
                if *right {
                    format!("{}:", "-".repeat(w + 1))
                } else {
                    format!(":{}", "-".repeat(w + 1))
                }
            })
            .collect();
        out.push('|');
        out.push_str(&separator.join("|"));
        out.push_str("|\n");

        for row in &cells {
            push_line(&mut out, row, &widths, &numeric);
        }
        out.pop();
        out
    }

    fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, FormattingError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}

fn shape_with_schema(
    records: &[&Map<String, Value>],
    contract: &SchemaContract,
) -> Result<TabularResult, FormattingError> {
    let columns: Vec<String> = contract.field_names().map(str::to_string).collect();

    // An empty list answers none of the required fields
    if records.is_empty() {
        if let Some(field) = contract.fields().iter().find(|f| f.required) {
            return Err(FormattingError::MissingRequiredField(field.name.clone()));
        }
    }

    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let mut row = Row::with_capacity(columns.len());
        for field in contract.fields() {
            let value = match record.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(FormattingError::MissingRequiredField(field.name.clone()));
                }
                None | Some(Value::Null) => FieldValue::Null,
                Some(value) => FieldValue::coerce(value, field.field_type).ok_or_else(|| {
                    FormattingError::TypeCoercion {
                        field: field.name.clone(),
                        expected: field.field_type,
                        value: value.to_string(),
                    }
                })?,
            };
            row.insert(field.name.clone(), value);
        }
        rows.push(row);
    }

    Ok(TabularResult { columns, rows })
}

fn shape_inferred(records: &[&Map<String, Value>]) -> TabularResult {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|col| {
                    let value = record.get(col).map_or(FieldValue::Null, FieldValue::from_json);
                    (col.clone(), value)
                })
                .collect()
        })
        .collect();

    TabularResult { columns, rows }
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize], right: &[bool]) {
    out.push('|');
    for ((cell, width), right) in cells.iter().zip(widths).zip(right) {
        if *right {
            out.push_str(&format!(" {cell:>width$} |"));
        } else {
            out.push_str(&format!(" {cell:<width$} |"));
        }
    }
    out.push('\n');
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
