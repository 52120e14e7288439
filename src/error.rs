//! Error types for ncplot.
//!
//! A single `thiserror` enum covers the whole library; binaries convert
//! these into user-facing messages and exit codes at the command boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for ncplot operations.
pub type Result<T> = std::result::Result<T, NcplotError>;

/// Errors that can occur while resolving, slicing, scanning or plotting.
#[derive(Debug, Error)]
pub enum NcplotError {
    /// Expression references an unknown variable or is syntactically invalid.
    /// Lists every variable present in the default source to aid the caller.
    #[error("{message}\nVariables present in source '{source_name}': {}.", available.join(", "))]
    Expression {
        message: String,
        source_name: String,
        available: Vec<String>,
    },

    /// Resolved variable/slice combination cannot be plotted as-is.
    #[error("{0}")]
    Dimensionality(String),

    /// Underlying data source failed to open.
    #[error("failed to open '{path}': {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },

    /// Underlying data source failed while being read.
    #[error("NetCDF error: {0}")]
    Source(#[from] netcdf::Error),

    /// A coordinate variable used for dynamic titling does not include its
    /// own dimension: the input metadata is malformed.
    #[error("coordinate variable '{coordinate}' does not use its own dimension '{dimension}' (dimensions: {})", dims.join(", "))]
    CoordinateConsistency {
        dimension: String,
        coordinate: String,
        dims: Vec<String>,
    },

    /// A data source name was referenced but never bound.
    #[error("unknown data source '{0}'")]
    UnknownSource(String),

    /// A figure property path did not resolve.
    #[error("'{path}' was not found in plot properties")]
    Property { path: String },

    /// A figure property path resolved but the value could not be assigned.
    #[error("'{path}': cannot assign value '{value}'. {reason}")]
    PropertyValue {
        path: String,
        value: String,
        reason: String,
    },

    /// Figure export failed.
    #[error("render error: {0}")]
    Render(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NcplotError {
    /// Create an Expression error carrying the default source's variable names.
    pub fn expression(
        message: impl Into<String>,
        source_name: impl Into<String>,
        mut available: Vec<String>,
    ) -> Self {
        available.sort();
        Self::Expression {
            message: message.into(),
            source_name: source_name.into(),
            available,
        }
    }

    pub fn source_open(path: PathBuf, source: netcdf::Error) -> Self {
        Self::SourceOpen { path, source }
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }
}
