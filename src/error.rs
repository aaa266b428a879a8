//! # Error Types Module
//!
//! This module defines all the error types used throughout the loader.
//!
//! ## Plain English Explanation
//!
//! Errors are grouped by the part of the loader that raised them, like
//! folders in a filing cabinet:
//!
//! - "Dataset: `trains` does not exist"
//! - "Path: `/data/cats` is not a directory"
//! - "Sampler: class 1 has 2 images but 3 were requested"
//!
//! Setup mistakes come back to the caller straight away. Problems inside
//! the background worker are either recovered (a broken image is skipped)
//! or reported through `get`/`stop` (the sampler gave up).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::LoaderState;

// ============================================
// MAIN LOADER ERROR
// ============================================

/// The main error type for the loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Something is wrong with a named dataset
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetErrorKind),

    /// A filesystem path did not meet the operation's requirements
    #[error("Path error: {0}")]
    Path(#[from] PathErrorKind),

    /// The stratified sampler could not build a batch
    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    /// The label table could not be read or accessed
    #[error("Label table error: {0}")]
    Table(#[from] TableError),

    /// Configuration values are out of range
    #[error("Configuration error: {0}")]
    Config(ConfigError),

    /// The operation does not fit the loader's lifecycle state
    ///
    /// ## Examples
    /// - `get` before `run`
    /// - `add_folder` while the worker is running
    /// - `run` after `stop`
    #[error("Cannot {operation} while the loader is {state}")]
    InvalidState {
        operation: &'static str,
        state: LoaderState,
    },

    /// A caller-provided buffer does not match the slot size
    #[error("Buffer holds {got} bytes but a slot is {expected} bytes")]
    BufferSize { expected: usize, got: usize },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Something unexpected happened
    #[error("Internal error: {0}")]
    Internal(String),
}

// ============================================
// DATASET ERRORS
// ============================================

/// Errors about registering and selecting datasets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetErrorKind {
    /// `create_dataset` was called with a name already in use
    #[error("dataset \"{0}\" already exists")]
    AlreadyExists(String),

    /// `select_dataset` named a dataset that was never created
    #[error("dataset \"{0}\" does not exist")]
    NotFound(String),

    /// A mutation needs an active dataset and none was selected
    #[error("no dataset selected")]
    NoActiveDataset,

    /// The active dataset has no images in any class
    ///
    /// ## What This Means
    /// Every registered folder was empty (or had no accepted extensions),
    /// so there is nothing to sample.
    #[error("dataset \"{0}\" contains no images")]
    EmptyDataset(String),

    /// Typed label access was requested but no table was loaded
    #[error("dataset \"{0}\" has no label table")]
    NoLabelTable(String),
}

// ============================================
// PATH ERRORS
// ============================================

/// Errors about folders and files handed to the loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathErrorKind {
    #[error("path \"{}\" does not exist, looks like it was deleted or moved", .0.display())]
    PathNotFound(PathBuf),

    #[error("path \"{}\" is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("path \"{}\" is not a regular file", .0.display())]
    NotAFile(PathBuf),

    /// The file has an extension this operation does not read
    #[error("path \"{}\" has unsupported extension \"{extension}\"", .path.display())]
    UnsupportedExtension { path: PathBuf, extension: String },
}

// ============================================
// SAMPLER ERRORS
// ============================================

/// Errors raised while building a stratified batch.
///
/// These are fatal to the background worker: the same class sizes would
/// fail the same way on every later batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplerError {
    /// A quota asked for more unique indices than its range holds
    ///
    /// ## What This Means
    /// `class` is the class whose own range ran dry, or `None` when the
    /// remainder draw over the whole population ran dry.
    #[error("{}: requested {requested} unique indices but only {available} remain", describe_class(.class))]
    ExhaustedClassPopulation {
        class: Option<usize>,
        requested: usize,
        available: usize,
    },

    /// No indices at all to draw from
    #[error("cannot sample from an empty population")]
    EmptyPopulation,
}

fn describe_class(class: &Option<usize>) -> String {
    match class {
        Some(index) => format!("class {}", index),
        None => "remainder draw".to_string(),
    }
}

// ============================================
// LABEL TABLE ERRORS
// ============================================

/// Errors from reading or indexing a label table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("cannot access column index {index}, table has {columns} columns")]
    ColumnOutOfBounds { index: usize, columns: usize },

    #[error("cannot access row index {index}, table has {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },

    /// A line did not have as many cells as the first line
    #[error("line {line} has {found} columns, expected {expected}")]
    ColumnCountMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("cannot convert \"{value}\" at row {row}, column {col} to {target}")]
    ValueConversionFailure {
        row: usize,
        col: usize,
        value: String,
        target: &'static str,
    },
}

// ============================================
// DECODE ERRORS
// ============================================

/// Errors from turning an image file into slot bytes.
///
/// ## Plain English
///
/// A broken or unreadable image is not the end of the world: the worker
/// logs it, skips it, and moves on to the next sampled index.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The file could not be opened or its format guessed
    #[error("cannot open image \"{}\": {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    /// The file was opened but its pixels could not be decoded
    #[error("cannot decode image \"{}\": {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },

    /// The decoder produced a different number of bytes than one slot holds
    #[error("decoded {got} bytes but a slot holds {expected}")]
    BufferSize { expected: usize, got: usize },
}

// ============================================
// RESULT TYPE ALIAS
// ============================================

/// A Result type that uses LoaderError
pub type LoaderResult<T> = Result<T, LoaderError>;

// ============================================
// TESTS
// ============================================
