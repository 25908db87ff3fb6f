//! Streaming analytics for block-model CSV files.
//!
//! One pass over the input infers the schema, accumulates per-column statistics
//! and detects grid geometry; follow-on passes bin rows into swath,
//! grade-tonnage and section views. Memory stays bounded regardless of input size.
//!
//! - Sources: plain, gzip or zstd files, or an entry inside a ZIP container.
//! - Rows: filter and derived-column scripts run in a restricted interpreter
//!   (see [`script`]).
//! - Results: serde-serializable snapshots, also delivered as one-way
//!   [`Message`]s when a pass runs on its own task via [`spawn_pass`].
#![cfg_attr(docsrs, feature(doc_cfg))]
//
mod analyze;
mod codec;
pub mod geometry;
mod io;
mod message;
mod pass;
mod request;
pub mod row;
pub mod schema;
pub mod script;
pub mod sniff;
pub mod stats;
pub mod views;
pub mod zip;

pub use crate::analyze::{analyze, AnalysisResult, CategorySummary, GroupedStats, NumericSummary};
pub use crate::io::{build_reader, open_source, ByteCounter, Compression, Source, SourceMeta};
pub use crate::message::{
    execute, spawn_pass, ErrorKind, Events, HeaderInfo, Message, PassHandle, Progress,
};
pub use crate::pass::PassSummary;
pub use crate::request::{
    AxisColumns, DensitySource, EngineConfig, GradeRange, GradeTonnageRequest, PassRequest,
    ScanRequest, SectionRequest, SwathRequest, SwathStatistic,
};
pub use crate::views::{grade_tonnage, section, swath};

use thiserror::Error;

/// Errors that abort a pass.
///
/// Row-level script failures never surface here; they are counted in the
/// pass summary instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv_async::Error),
    #[error("not a valid zip container: end of central directory record not found")]
    NotAContainer,
    #[error("zip entry not found: {0}")]
    EntryNotFound(String),
    #[error("unsupported zip compression method: {0}")]
    UnsupportedCompression(u16),
    #[error("corrupt container: {0}")]
    Corrupt(String),
    #[error("input is empty: no header line found")]
    EmptyInput,
    #[error("unknown charset label: {0}")]
    UnknownCharset(String),
    #[error("filter expression: {0}")]
    FilterCompile(#[source] script::CompileError),
    #[error("derived column script: {0}")]
    ScriptCompile(#[source] script::CompileError),
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ScanError {
    /// Routing category for the `error` message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Io(_) => ErrorKind::Io,
            ScanError::Csv(e) if e.is_io_error() => ErrorKind::Io,
            ScanError::Csv(_)
            | ScanError::NotAContainer
            | ScanError::EntryNotFound(_)
            | ScanError::UnsupportedCompression(_)
            | ScanError::Corrupt(_)
            | ScanError::EmptyInput
            | ScanError::UnknownCharset(_) => ErrorKind::Format,
            ScanError::FilterCompile(_) => ErrorKind::Filter,
            ScanError::ScriptCompile(_) => ErrorKind::Script,
            ScanError::MissingColumn(_) | ScanError::InvalidRequest(_) => ErrorKind::Request,
        }
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
