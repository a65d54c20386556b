// ABOUTME: CSV-backed RowSink and RowSource implementations
// ABOUTME: Every field is double-quoted on write, NULL as \N; malformed records are skipped on read

use super::{RowSink, RowSource};
use crate::model::{Row, Value};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Field text standing for SQL NULL, as in `LOAD DATA` and `mysqldump --tab`.
pub const NULL_MARKER: &str = "\\N";

/// Writes rows as CSV with a header line and every value quoted.
///
/// NULL is written as [`NULL_MARKER`] so it stays distinct from an empty string.
pub struct CsvRowSink<W: Write> {
    writer: csv::Writer<W>,
    columns: usize,
    rows: u64,
}

impl CsvRowSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create backup file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> CsvRowSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .quote_style(csv::QuoteStyle::Always)
                .from_writer(writer),
            columns: 0,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))
    }
}

impl<W: Write> RowSink for CsvRowSink<W> {
    fn write_header(&mut self, columns: &[String]) -> Result<()> {
        self.columns = columns.len();
        self.writer
            .write_record(columns)
            .context("Failed to write CSV header")
    }

    fn write_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns {
            bail!(
                "Row has {} values but the header has {} columns",
                row.len(),
                self.columns
            );
        }
        let fields: Vec<String> = row
            .iter()
            .map(|v| v.to_field().unwrap_or_else(|| NULL_MARKER.to_string()))
            .collect();
        self.writer
            .write_record(&fields)
            .with_context(|| format!("Failed to write CSV row {}", self.rows + 1))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush CSV output")
    }
}

/// Reads rows lazily from CSV with a header line.
///
/// Records whose field count differs from the header are skipped with a
/// warning, as are records that are not valid UTF-8. [`NULL_MARKER`] becomes
/// NULL; empty fields stay empty strings.
pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
    columns: Vec<String>,
    record: csv::StringRecord,
    skipped: u64,
}

impl CsvRowSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
        Self::new(BufReader::new(file))
            .with_context(|| format!("Failed to read CSV header of {}", path.display()))
    }
}

impl<R: Read> CsvRowSource<R> {
    pub fn new(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);
        let columns: Vec<String> = reader
            .headers()
            .context("CSV input has no readable header line")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
            bail!("CSV header line is empty");
        }
        Ok(Self {
            reader,
            columns,
            record: csv::StringRecord::new(),
            skipped: 0,
        })
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => return Ok(None),
                Ok(true) => {
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    if self.record.len() != self.columns.len() {
                        tracing::warn!(
                            "Skipping malformed line {}: {} values, expected {}",
                            line,
                            self.record.len(),
                            self.columns.len()
                        );
                        self.skipped += 1;
                        continue;
                    }
                    let row = self
                        .record
                        .iter()
                        .map(|field| {
                            if field == NULL_MARKER {
                                Value::Null
                            } else {
                                Value::text(field)
                            }
                        })
                        .collect();
                    return Ok(Some(row));
                }
                Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                    tracing::warn!("Skipping line that is not valid UTF-8: {}", e);
                    self.skipped += 1;
                }
                Err(e) => return Err(e).context("Failed to read CSV record"),
            }
        }
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}
