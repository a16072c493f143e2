use crate::error::SinkError;
use crate::flusher::Row;
use chrono::{Datelike, NaiveDate};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Durable destination for finalized rows. Only the flusher appends.
pub trait RowSink: Send {
    fn append(&mut self, row: &Row) -> Result<(), SinkError>;
}

pub fn header(metric_order: &[String]) -> Vec<String> {
    std::iter::once(TIMESTAMP_COLUMN.to_string())
        .chain(metric_order.iter().cloned())
        .collect()
}

/// One CSV file per day under `<root>/<YYYY>/<MM>/<DD>.csv`.
///
/// A day file whose header lists other columns (the source list changed
/// between runs) is left alone; rows go to `<DD>-1.csv`, `<DD>-2.csv`, ...
/// instead.
#[derive(Debug, Clone)]
pub struct CsvDailySink {
    root: PathBuf,
    header: Vec<String>,
    current: Option<(NaiveDate, PathBuf)>,
}

impl CsvDailySink {
    /// Creates the root directory. Failure here is fatal for the sink.
    pub fn new(root: impl Into<PathBuf>, metric_order: &[String]) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SinkError::CreateDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            header: header(metric_order),
            current: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}.csv", date.day()))
    }

    /// File that rows for `date` go to: the day file, or the first suffixed
    /// variant whose header matches ours.
    fn target_for(&mut self, date: NaiveDate) -> Result<PathBuf, SinkError> {
        if let Some((cached, path)) = &self.current {
            if *cached == date {
                return Ok(path.clone());
            }
        }

        let base = self.path_for(date);
        let mut path = base.clone();
        let mut suffix = 0;
        while let Some(existing) = read_header(&path)? {
            if existing == self.header {
                break;
            }
            suffix += 1;
            path = base.with_file_name(format!("{:02}-{suffix}.csv", date.day()));
        }
        if suffix > 0 {
            tracing::warn!(
                day_file = %base.display(),
                path = %path.display(),
                "day file has different columns; writing to a separate file"
            );
        }

        self.current = Some((date, path.clone()));
        Ok(path)
    }
}

impl RowSink for CsvDailySink {
    fn append(&mut self, row: &Row) -> Result<(), SinkError> {
        let path = self.target_for(row.window().date())?;
        append_row(&path, &self.header, row.fields())
    }
}

/// Appends `fields` to the CSV at `path`, writing `header` first when the file
/// is new or empty.
pub fn append_row(path: &Path, header: &[String], fields: &[String]) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SinkError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let needs_header = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(source) => {
            return Err(SinkError::Open {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    let write_err = |source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    };
    if needs_header {
        writer.write_record(header).map_err(write_err)?;
    }
    writer.write_record(fields).map_err(write_err)?;
    writer.flush().map_err(|source| SinkError::Flush {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// First record of an existing, non-empty CSV file.
fn read_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    if !path.is_file() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| SinkError::ReadHeader {
            path: path.to_path_buf(),
            source,
        })?;
    match reader.records().next() {
        None => Ok(None),
        Some(record) => {
            let record = record.map_err(|source| SinkError::ReadHeader {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Some(record.iter().map(str::to_string).collect()))
        }
    }
}
