//! Error types for the rrdrec recorder.

use thiserror::Error;

/// The main error type for all rrdrec operations.
///
/// Each variant wraps the error enum of one layer, so callers can match on
/// the layer that failed while still propagating with `?`.
#[derive(Error, Debug)]
pub enum RrdError {
    /// A scaled-duration literal was rejected.
    #[error("invalid duration: {0}")]
    Duration(#[from] DurationError),

    /// A database definition was rejected.
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    /// Error creating or opening a backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error during an update (write path).
    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    /// Error during a window read (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error building or rendering a graph.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Errors produced by the scaled-duration grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    /// The literal was empty.
    #[error("duration literal is empty")]
    Empty,

    /// The magnitude was zero or negative.
    #[error("duration '{literal}' must be positive")]
    NotPositive {
        /// The offending literal.
        literal: String,
    },

    /// The literal ended in something other than `s`, `m`, `h`, `d`, `w`, `M` or `y`.
    #[error("duration '{literal}' must use a scaling unit (s, m, h, d, w, M, y)")]
    UnknownUnit {
        /// The offending literal.
        literal: String,
    },

    /// The magnitude was not an integer.
    #[error("duration '{literal}' must be a number")]
    NotANumber {
        /// The offending literal.
        literal: String,
    },

    /// A scaled duration does not divide evenly into the required unit.
    #[error("duration '{literal}' is not a multiple of {divisor}s")]
    NotAMultiple {
        /// The offending literal.
        literal: String,
        /// The divisor in seconds.
        divisor: u64,
    },

    /// The value overflows a 64-bit second count.
    #[error("duration '{literal}' is too large")]
    Overflow {
        /// The offending literal.
        literal: String,
    },
}

/// Errors that can occur while validating a database definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The database name cannot be used as a file name.
    #[error("invalid database name '{name}': {reason}")]
    InvalidDatabaseName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A data source name is empty, too long, or uses characters outside `[A-Za-z0-9_]`.
    #[error("invalid data source name '{name}': {reason}")]
    InvalidDataSourceName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two data sources in one database share a name.
    #[error("duplicate data source name '{name}'")]
    DuplicateDataSource {
        /// The colliding name.
        name: String,
    },

    /// A data source declares `min > max`.
    #[error("data source '{name}' has min {min} greater than max {max}")]
    InvalidRange {
        /// The data source name.
        name: String,
        /// Declared minimum.
        min: f64,
        /// Declared maximum.
        max: f64,
    },

    /// An xff value lies outside `[0, 1]`.
    #[error("archive {index} has xff {xff} outside [0, 1]")]
    InvalidXff {
        /// Index of the archive tier.
        index: usize,
        /// The rejected value.
        xff: f64,
    },

    /// An archive's row length does not fit in seconds.
    #[error("archive {index} row length of {steps_per_row} steps of {step}s overflows")]
    RowLengthOverflow {
        /// Index of the archive tier.
        index: usize,
        /// Steps consolidated into one row.
        steps_per_row: u64,
        /// Database step in seconds.
        step: u64,
    },

    /// The database has no data sources.
    #[error("at least one data source must be configured")]
    NoDataSources,

    /// The database has no archive tiers.
    #[error("at least one round robin archive must be configured")]
    NoArchives,

    /// A duration inside the definition is invalid.
    #[error("{field}: {source}")]
    Duration {
        /// Which field carried the duration.
        field: String,
        /// The underlying grammar error.
        #[source]
        source: DurationError,
    },
}

/// Errors that can occur when creating or opening a backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory or file could not be created.
    #[error("failed to create '{path}': {source}")]
    Create {
        /// The path that could not be created.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but could not be opened or mapped.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// The path that could not be opened.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not have the expected format.
    #[error("'{path}' is corrupted: {reason}")]
    Corrupted {
        /// The file path.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The file layout does not match the configured database.
    #[error("'{path}' does not match the configured database: {reason}")]
    SchemaMismatch {
        /// The file path.
        path: String,
        /// The first difference found.
        reason: String,
    },
}

/// Errors that can occur during an update.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The timestamp is not strictly after the last committed one.
    #[error("timestamp {timestamp} is not after last update {last_update}")]
    OutOfOrder {
        /// The rejected timestamp.
        timestamp: u64,
        /// The last committed timestamp.
        last_update: u64,
    },

    /// The sample names a data source the database does not declare.
    #[error("unknown data source '{name}'")]
    UnknownDataSource {
        /// The unknown name.
        name: String,
    },

    /// The file could not be flushed to disk.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when reading a window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The data source is not declared in the file.
    #[error("unknown data source '{name}'")]
    UnknownDataSource {
        /// The requested name.
        name: String,
    },

    /// The requested archive tier index is invalid.
    #[error("invalid archive {tier}: only {tiers} archives available")]
    InvalidTier {
        /// The requested tier index.
        tier: usize,
        /// The number of tiers available.
        tiers: usize,
    },

    /// The time range is invalid (start >= end).
    #[error("invalid time range: start {start} >= end {end}")]
    InvalidTimeRange {
        /// The start time.
        start: u64,
        /// The end time.
        end: u64,
    },
}

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid JSON for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An image dimension lies outside the supported range.
    #[error("{field} {value} outside {min}..={max}")]
    ImageSize {
        /// Which dimension.
        field: &'static str,
        /// The rejected value.
        value: u32,
        /// Smallest accepted value.
        min: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// The configured tolerance is negative or not finite.
    #[error("tolerance {0} must be a finite non-negative number")]
    Tolerance(f64),
}

/// Errors that can occur while producing a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The rendering backend rejected the request.
    #[error("render failed: {0}")]
    Render(String),
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;
