//! Tabular Reader - loads source extracts into typed records.
//!
//! A [`ColumnContract`] names the logical columns a stage needs, the source
//! header each one is read from, and the type it is coerced to. Columns not
//! named by the contract are ignored.
//!
//! Reading is restartable: every call to [`RecordSource::read`] re-opens the
//! source and yields the same sequence again.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use encoding_rs::Encoding;
use tracing::warn;

use crate::error::EtlError;
use crate::normalize::strip_float_suffix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Free text, trimmed.
    Text,
    /// Identifier kept as text; numeric artifacts (`"1234.0"`) are normalized.
    Code,
    Integer,
    Float,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractColumn {
    pub name: &'static str,
    pub header: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnContract {
    columns: Vec<ContractColumn>,
}

impl ColumnContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: &'static str, header: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ContractColumn {
            name,
            header: header.into(),
            kind,
        });
        self
    }

    /// Replace source headers for the logical names present in `overrides`.
    pub fn with_header_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        for column in &mut self.columns {
            if let Some(header) = overrides.get(column.name) {
                column.header = header.clone();
            }
        }
        self
    }

    pub fn columns(&self) -> &[ContractColumn] {
        &self.columns
    }
}

/// One source row projected onto a contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<&'static str, Value>,
}

impl Record {
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Delimiter, text encoding and null markers of one source.
#[derive(Debug, Clone)]
pub struct SourceFormat {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    pub null_markers: Vec<String>,
}

impl Default for SourceFormat {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: encoding_rs::UTF_8,
            null_markers: Vec::new(),
        }
    }
}

/// Anything that can hand out rows under a column contract: a file extract,
/// or an adapter over responses from the upstream data service.
pub trait RecordSource {
    fn name(&self) -> String;

    fn read(&self, contract: &ColumnContract) -> Result<Records, EtlError>;
}

type RawRows = Box<dyn Iterator<Item = Result<StringRecord, csv::Error>> + Send>;

/// Lazy, single-pass sequence of coerced records.
pub struct Records {
    source_name: String,
    projection: Vec<(usize, ContractColumn)>,
    null_markers: Vec<String>,
    rows: RawRows,
}

impl Records {
    fn new(
        source_name: String,
        contract: &ColumnContract,
        headers: &StringRecord,
        null_markers: Vec<String>,
        rows: RawRows,
    ) -> Result<Self, EtlError> {
        let projection = project(&source_name, contract, headers)?;
        Ok(Self {
            source_name,
            projection,
            null_markers,
            rows,
        })
    }

    fn coerce_cell(&self, raw: &str, column: &ContractColumn) -> Value {
        coerce(raw, column.kind, &self.null_markers).unwrap_or_else(|cell| {
            warn!(
                source = %self.source_name,
                column = column.name,
                cell,
                kind = ?column.kind,
                "unparseable cell coerced to null"
            );
            Value::Null
        })
    }
}

impl Iterator for Records {
    type Item = Result<Record, EtlError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(source) => {
                return Some(Err(EtlError::Csv {
                    source_name: self.source_name.clone(),
                    source,
                }))
            }
        };

        let values = self
            .projection
            .iter()
            .map(|(idx, column)| {
                let value = row
                    .get(*idx)
                    .map_or(Value::Null, |raw| self.coerce_cell(raw, column));
                (column.name, value)
            })
            .collect();

        Some(Ok(Record { values }))
    }
}

/// Resolve each contracted header to its position in the source.
fn project(
    source_name: &str,
    contract: &ColumnContract,
    headers: &StringRecord,
) -> Result<Vec<(usize, ContractColumn)>, EtlError> {
    contract
        .columns()
        .iter()
        .map(|column| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column.header.trim()))
                .map(|idx| (idx, column.clone()))
                .ok_or_else(|| EtlError::SchemaMismatch {
                    source_name: source_name.to_string(),
                    column: column.name.to_string(),
                    header: column.header.clone(),
                })
        })
        .collect()
}

/// Empty cells and null markers are `Null`; a cell that fails to parse as
/// its kind comes back as `Err` with the trimmed text.
fn coerce<'a>(raw: &'a str, kind: ColumnKind, null_markers: &[String]) -> Result<Value, &'a str> {
    let cell = raw.trim();
    if cell.is_empty() || null_markers.iter().any(|m| m == cell) {
        return Ok(Value::Null);
    }

    let value = match kind {
        ColumnKind::Text => Some(Value::Text(cell.to_string())),
        ColumnKind::Code => Some(Value::Text(strip_float_suffix(cell).to_string())),
        ColumnKind::Integer => parse_integer(cell).map(Value::Integer),
        ColumnKind::Float => parse_float(cell).map(Value::Float),
    };
    value.ok_or(cell)
}

fn parse_integer(cell: &str) -> Option<i64> {
    if let Ok(i) = cell.parse::<i64>() {
        return Some(i);
    }
    // "1234.0" from sources that stored integers as floats
    let f = cell.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

fn parse_float(cell: &str) -> Option<f64> {
    let parsed = if cell.contains('.') {
        cell.parse::<f64>()
    } else {
        cell.replacen(',', ".", 1).parse::<f64>()
    };
    parsed.ok().filter(|f| f.is_finite())
}

// =============================================================================
// CSV FILE SOURCE
// =============================================================================

#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    format: SourceFormat,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self, contract: &ColumnContract) -> Result<Records, EtlError> {
        let bytes = std::fs::read(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                EtlError::MissingSource {
                    path: self.path.clone(),
                }
            } else {
                EtlError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        // decode() sniffs and removes a BOM before falling back to the configured encoding
        let (text, _, had_errors) = self.format.encoding.decode(&bytes);
        if had_errors {
            warn!(
                source = %self.path.display(),
                encoding = self.format.encoding.name(),
                "source contains byte sequences invalid for its encoding; replaced"
            );
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.format.delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(Cursor::new(text.into_owned().into_bytes()));

        let headers = reader
            .headers()
            .map_err(|source| EtlError::Csv {
                source_name: self.name(),
                source,
            })?
            .clone();

        Records::new(
            self.name(),
            contract,
            &headers,
            self.format.null_markers.clone(),
            Box::new(reader.into_records()),
        )
    }
}

// =============================================================================
// IN-MEMORY SOURCE
// =============================================================================

/// Rows already held in memory, e.g. decoded from an upstream service response.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    null_markers: Vec<String>,
}

impl MemorySource {
    pub fn new<I, S>(name: impl Into<String>, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            null_markers: Vec::new(),
        }
    }

    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
        self
    }

    pub fn null_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.null_markers = markers.into_iter().map(Into::into).collect();
        self
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&self, contract: &ColumnContract) -> Result<Records, EtlError> {
        let headers = StringRecord::from(self.headers.clone());
        let rows: Vec<Result<StringRecord, csv::Error>> = self
            .rows
            .iter()
            .map(|cells| Ok(StringRecord::from(cells.clone())))
            .collect();

        Records::new(
            self.name(),
            contract,
            &headers,
            self.null_markers.clone(),
            Box::new(rows.into_iter()),
        )
    }
}
