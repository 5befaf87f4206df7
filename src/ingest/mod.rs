//! Streaming readers for the tables exported from Trac.
//!
//! Every table has a header row and a fixed column count. A row with the
//! wrong number of columns aborts the whole run: a silently skipped ticket
//! would shift every later issue number.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use encoding_rs::Encoding;
use thiserror::Error;

pub(crate) mod attachments;
pub(crate) mod comments;
pub(crate) mod tickets;

#[derive(Debug, Error)]
pub(crate) enum IngestError {
    #[error("{}:{row}: row must have {expected} columns but has {actual}", display_name(.path))]
    MalformedRow {
        path: PathBuf,
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{}:{row}: column {column} {reason}", display_name(.path))]
    BadField {
        path: PathBuf,
        row: usize,
        column: usize,
        reason: String,
    },
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A delimited file with a known schema. Each call to [`Table::rows`]
/// reopens the file, so a table can be validated and then streamed.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    path: PathBuf,
    columns: usize,
    encoding: &'static Encoding,
}

impl Table {
    pub(crate) fn new<P: AsRef<Path>>(
        path: P,
        columns: usize,
        encoding: &'static Encoding,
    ) -> Table {
        Table {
            path: path.as_ref().to_path_buf(),
            columns,
            encoding,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows in file order, header discarded.
    pub(crate) fn rows(&self) -> Result<Rows, IngestError> {
        let file = File::open(&self.path).map_err(|source| IngestError::Io {
            path: self.path.clone(),
            source,
        })?;
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file)
            .into_byte_records();
        Ok(Rows {
            path: self.path.clone(),
            columns: self.columns,
            encoding: self.encoding,
            records,
            number: 0,
        })
    }
}

pub(crate) struct Rows {
    path: PathBuf,
    columns: usize,
    encoding: &'static Encoding,
    records: csv::ByteRecordsIntoIter<File>,
    number: usize,
}

impl Iterator for Rows {
    type Item = Result<Row, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(source) => {
                    return Some(Err(IngestError::Csv {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.number += 1;
            if record.len() != self.columns {
                return Some(Err(IngestError::MalformedRow {
                    path: self.path.clone(),
                    row: self.number,
                    expected: self.columns,
                    actual: record.len(),
                }));
            }
            if self.number == 1 {
                if let Some((sniffed, _)) = record.get(0).and_then(Encoding::for_bom) {
                    if sniffed.is_ascii_compatible() {
                        self.encoding = sniffed;
                    }
                }
                continue;
            }
            let mut fields = Vec::with_capacity(record.len());
            for (index, raw) in record.iter().enumerate() {
                let (text, had_errors) = self.encoding.decode_without_bom_handling(raw);
                if had_errors {
                    return Some(Err(IngestError::BadField {
                        path: self.path.clone(),
                        row: self.number,
                        column: index + 1,
                        reason: format!("is not valid {}", self.encoding.name()),
                    }));
                }
                fields.push(text.into_owned());
            }
            return Some(Ok(Row {
                path: self.path.clone(),
                number: self.number,
                fields,
            }));
        }
    }
}

/// One decoded data row. Columns are addressed 1-based, as in the export
/// schema.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    path: PathBuf,
    number: usize,
    fields: Vec<String>,
}

impl Row {
    pub(crate) fn text(&self, column: usize) -> &str {
        self.fields[column - 1].as_str()
    }

    pub(crate) fn trimmed(&self, column: usize) -> String {
        self.text(column).trim().to_string()
    }

    pub(crate) fn id(&self, column: usize) -> Result<u64, IngestError> {
        self.text(column)
            .trim()
            .parse()
            .map_err(|_| self.bad_field(column, "must be a ticket number"))
    }

    /// Seconds since the epoch; an empty cell is no timestamp.
    pub(crate) fn epoch(&self, column: usize) -> Result<Option<DateTime<Utc>>, IngestError> {
        let raw = self.text(column).trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let seconds: i64 = raw
            .parse()
            .map_err(|_| self.bad_field(column, "must be seconds since the epoch"))?;
        match Utc.timestamp_opt(seconds, 0) {
            chrono::LocalResult::Single(at) => Ok(Some(at)),
            _ => Err(self.bad_field(column, "is out of range")),
        }
    }

    pub(crate) fn bad_field(&self, column: usize, reason: &str) -> IngestError {
        IngestError::BadField {
            path: self.path.clone(),
            row: self.number,
            column,
            reason: format!("{reason} but is {:?}", self.text(column)),
        }
    }
}
