//! # Label Table
//!
//! A small CSV reader that keeps every cell as text and converts on access.
//!
//! ## Plain English
//!
//! Some datasets ship a `labels.csv` next to the image folders (bounding
//! boxes, class ids, file names...). We read it once, check every line has
//! the same number of columns, and let callers ask for a cell, a row or a
//! column as whatever type they need.

use std::any::type_name;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{LoaderResult, TableError};
use crate::storage;

// ============================================
// TABLE OPTIONS
// ============================================

/// How a label table file is parsed.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Treat the first line as column names instead of data
    pub has_header: bool,
    /// Cell separator (default: `,`)
    pub delimiter: char,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            has_header: false,
            delimiter: ',',
        }
    }
}

impl TableOptions {
    pub fn has_header(mut self, h: bool) -> Self {
        self.has_header = h;
        self
    }

    pub fn delimiter(mut self, d: char) -> Self {
        self.delimiter = d;
        self
    }
}

// ============================================
// LABEL TABLE
// ============================================

/// Rectangular table of text cells with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
    columns: usize,
}

impl LabelTable {
    /// Reads a `.csv` file from disk.
    pub fn read(path: &Path, options: &TableOptions) -> LoaderResult<Self> {
        storage::require_file_with_extension(path, "csv")?;
        let content = fs::read_to_string(path)?;
        let table = Self::parse(&content, options)?;

        log::info!(
            "Loaded label table {:?}: {} rows x {} columns",
            path,
            table.num_rows(),
            table.num_columns()
        );
        Ok(table)
    }

    /// Parses CSV text. Blank lines are skipped.
    pub fn parse(content: &str, options: &TableOptions) -> Result<Self, TableError> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                let cells: Vec<String> = line
                    .split(options.delimiter)
                    .map(|cell| cell.to_string())
                    .collect();
                (number + 1, cells)
            });

        let header = if options.has_header {
            lines.next().map(|(_, cells)| cells)
        } else {
            None
        };

        let mut columns = header.as_ref().map(|h| h.len());
        let mut rows = Vec::new();

        for (line, cells) in lines {
            let expected = *columns.get_or_insert(cells.len());
            if cells.len() != expected {
                return Err(TableError::ColumnCountMismatch {
                    line,
                    expected,
                    found: cells.len(),
                });
            }
            rows.push(cells);
        }

        Ok(Self {
            header,
            rows,
            columns: columns.unwrap_or(0),
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns
    }

    /// Column names, if the table was read with a header line.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Position of the column called `name` in the header.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.as_ref()?.iter().position(|h| h.trim() == name)
    }

    /// Raw text of one cell.
    pub fn cell(&self, row: usize, col: usize) -> Result<&str, TableError> {
        self.check_col(col)?;
        self.check_row(row)?;
        Ok(&self.rows[row][col])
    }

    /// One cell converted to `T`.
    pub fn get<T: FromStr>(&self, row: usize, col: usize) -> Result<T, TableError> {
        let value = self.cell(row, col)?;
        convert(value, row, col)
    }

    /// A whole row converted to `T`.
    pub fn row<T: FromStr>(&self, row: usize) -> Result<Vec<T>, TableError> {
        self.check_row(row)?;
        self.rows[row]
            .iter()
            .enumerate()
            .map(|(col, value)| convert(value, row, col))
            .collect()
    }

    /// A whole column converted to `T`.
    pub fn column<T: FromStr>(&self, col: usize) -> Result<Vec<T>, TableError> {
        self.check_col(col)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row, cells)| convert(&cells[col], row, col))
            .collect()
    }

    fn check_row(&self, row: usize) -> Result<(), TableError> {
        if row >= self.rows.len() {
            return Err(TableError::RowOutOfBounds {
                index: row,
                rows: self.rows.len(),
            });
        }
        Ok(())
    }

    fn check_col(&self, col: usize) -> Result<(), TableError> {
        if col >= self.columns {
            return Err(TableError::ColumnOutOfBounds {
                index: col,
                columns: self.columns,
            });
        }
        Ok(())
    }
}

fn convert<T: FromStr>(value: &str, row: usize, col: usize) -> Result<T, TableError> {
    value
        .trim()
        .parse()
        .map_err(|_| TableError::ValueConversionFailure {
            row,
            col,
            value: value.to_string(),
            target: type_name::<T>(),
        })
}

// ============================================
// TESTS
// ============================================
