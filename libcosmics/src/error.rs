use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Error)]
pub enum FilterError {
    #[error("Trigger expression is empty")]
    EmptyExpression,
    #[error("Unexpected character {0:?} at offset {1} in trigger expression")]
    BadCharacter(char, usize),
    #[error("Unexpected token {0:?} in trigger expression")]
    BadToken(String),
    #[error("Trigger expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("Trigger expression has trailing input starting at {0:?}")]
    TrailingInput(String),
    #[error("Trigger expression refers to unknown column {0:?}")]
    UnknownColumn(String),
    #[error("Trigger expression refers to column {0:?} which is not scalar per event")]
    NotScalar(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not open event store because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Event store has no table named {0:?}")]
    MissingTable(String),
    #[error("Event store table {0:?} is missing the n_entries attribute")]
    MissingEntryCount(String),
    #[error("Event store table has no column named {0:?}")]
    MissingColumn(String),
    #[error("Jagged column {0:?} has a malformed offsets dataset")]
    BadOffsets(String),
    #[error("Step size {0:?} could not be parsed; expected e.g. \"250 MB\" with unit kB/MB/GB")]
    BadStepSize(String),
    #[error("Tables have mismatched schemas: {0}")]
    SchemaMismatch(String),
    #[error("Event store failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Event store failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Triggered cache failed due to event store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Triggered cache failed due to trigger expression error: {0}")]
    FilterError(#[from] FilterError),
    #[error("Triggered cache directory {0:?} does not exist")]
    BadCacheDir(PathBuf),
    #[error("Triggered cache failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Mask grid file {0:?} has no shape header line")]
    MissingHeader(PathBuf),
    #[error("Mask grid file has a malformed shape header: {0:?}")]
    BadHeader(String),
    #[error("Mask grid file holds {found} values but the header shape implies {expected}")]
    BadValueCount { expected: usize, found: usize },
    #[error("Mask grid file contains a malformed value: {0}")]
    BadValue(#[from] std::num::ParseIntError),
    #[error("Mask grid file {0:?} did not round-trip after writing")]
    RoundTripFailure(PathBuf),
    #[error("Mask axis needs at least two positions to derive bin edges, got {0}")]
    AxisTooShort(usize),
    #[error("Mask build failed due to event store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Mask build requires column {0:?} in the source table")]
    MissingColumn(String),
    #[error("Mask layer plot failed: {0}")]
    PlotError(String),
    #[error("Mask failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
