//! Model point sets and the delimited text loader.
//!
//! A points file holds one `x<d>y<d>z` record per line, where `<d>` is a
//! single configurable delimiter character. Order defines the polyline.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use glam::DVec3;

/// A point in marker-relative units, before scaling.
pub type ModelPoint = DVec3;

/// Number of fields each record must have.
const FIELDS_PER_RECORD: usize = 3;

/// Error raised while parsing a points source.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("line {line}: expected 3 fields, found {found}")]
    FieldCount { line: usize, found: usize },
    #[error("line {line}: field {field} is not a finite number: {value:?}")]
    InvalidNumber {
        line: usize,
        field: usize,
        value: String,
    },
    #[error("failed to read points source: {0}")]
    Io(#[from] std::io::Error),
}

/// Ordered, immutable sequence of model points.
///
/// Cloning is cheap; a reload builds a new set and swaps it in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPointSet {
    points: Arc<[ModelPoint]>,
}

impl ModelPointSet {
    /// Parse a delimited text source.
    ///
    /// Blank lines are skipped and fields are trimmed. Any other line must have
    /// exactly three finite numeric fields; the first offending line fails the whole
    /// parse and nothing is returned.
    pub fn parse<R: BufRead>(source: R, delimiter: char) -> Result<Self, FormatError> {
        let mut points = Vec::new();

        for (index, line) in source.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            points.push(parse_record(&line, delimiter, index + 1)?);
        }

        Ok(Self::from(points))
    }

    /// Parse a points file from disk.
    pub fn load_file(path: &Path, delimiter: char) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file), delimiter)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ModelPoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[ModelPoint] {
        &self.points
    }
}

impl Default for ModelPointSet {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl From<Vec<ModelPoint>> for ModelPointSet {
    fn from(points: Vec<ModelPoint>) -> Self {
        Self {
            points: points.into(),
        }
    }
}

fn parse_record(line: &str, delimiter: char, line_number: usize) -> Result<ModelPoint, FormatError> {
    let fields: Vec<&str> = line.split(delimiter).collect();
    if fields.len() != FIELDS_PER_RECORD {
        return Err(FormatError::FieldCount {
            line: line_number,
            found: fields.len(),
        });
    }

    let mut coords = [0.0; FIELDS_PER_RECORD];
    for (i, field) in fields.iter().enumerate() {
        let trimmed = field.trim();
        coords[i] = trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| FormatError::InvalidNumber {
                line: line_number,
                field: i + 1,
                value: trimmed.to_string(),
            })?;
    }

    Ok(DVec3::from_array(coords))
}
