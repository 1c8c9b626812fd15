use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::trace;

use crate::error::ValidationError;

/// A delimited text table with a header row, held as raw string records.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<(u64, StringRecord)>,
}

/// Column positions resolved against a table's header.
#[derive(Debug, Clone, Copy)]
pub struct Columns<const N: usize>(pub [usize; N]);

impl Table {
    pub fn read(path: &Path, delimiter: u8) -> Result<Self, ValidationError> {
        let file = File::open(path).map_err(|source| ValidationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(path, BufReader::new(file), delimiter)
    }

    pub fn from_reader<R: std::io::Read>(
        path: &Path,
        reader: R,
        delimiter: u8,
    ) -> Result<Self, ValidationError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(reader);
        let as_malformed = |e: csv::Error| ValidationError::malformed(path, e.to_string());

        let headers = reader
            .headers()
            .map_err(as_malformed)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(as_malformed)?;
            let line = record.position().map_or(0, |p| p.line());
            rows.push((line, record));
        }
        trace!(path = %path.display(), rows = rows.len(), "Read table");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Resolve required column names, reporting every missing one at once.
    pub fn require<const N: usize>(&self, names: [&str; N]) -> Result<Columns<N>, ValidationError> {
        let mut found = [0usize; N];
        let mut missing = Vec::new();
        for (slot, name) in found.iter_mut().zip(names) {
            match self.headers.iter().position(|h| h == name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ValidationError::MissingColumns {
                path: self.path.clone(),
                columns: missing,
            });
        }
        Ok(Columns(found))
    }

    /// Iterate `(line, fields)` for the resolved columns.
    ///
    /// Short rows yield empty strings for absent fields.
    pub fn rows<const N: usize>(
        &self,
        columns: Columns<N>,
    ) -> impl Iterator<Item = (u64, [&str; N])> + '_ {
        self.rows.iter().map(move |(line, record)| {
            let fields = columns.0.map(|idx| record.get(idx).unwrap_or(""));
            (*line, fields)
        })
    }

    pub fn invalid(&self, line: u64, column: &str, value: &str) -> ValidationError {
        ValidationError::InvalidValue {
            path: self.path.clone(),
            line,
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}

/// Parse a non-negative count; integral floats such as `12.0` are accepted.
pub fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}
