//! One streaming pass: open, sniff, detect types, compile scripts, then feed
//! every admitted row to a [`RowSink`].

use crate::io::open_source;
use crate::message::{Events, HeaderInfo, Message, Progress};
use crate::request::{EngineConfig, ScanRequest};
use crate::row::{infer_derived_types, Row, RowEvaluator, RowLayout, Verdict};
use crate::schema::{Column, ColumnOrigin, ColumnType, Schema};
use crate::sniff::{clean_header, detect_delimiter, sample_lines, TypeDetector, COMMENT_PREFIX};
use crate::{ScanError, ScanResult};
use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord};
use serde::Serialize;
use std::io::Cursor;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Receives every admitted row of a pass, in file order.
pub(crate) trait RowSink {
    /// `raw` holds the header fields as read, before coercion.
    fn accept(&mut self, row: &Row, raw: &[String]);
}

/// Everything resolved before the first row reaches a sink.
#[derive(Debug, Clone)]
pub(crate) struct PassContext {
    pub schema: Schema,
    pub layout: RowLayout,
    pub delimiter: u8,
    pub source: String,
}

impl PassContext {
    /// Slot of a named column, header or derived.
    pub fn slot(&self, name: &str) -> ScanResult<usize> {
        self.schema
            .column(name)
            .map(|c| c.index)
            .ok_or_else(|| ScanError::MissingColumn(name.to_string()))
    }
}

/// Row counters and timing of a finished pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub rows_read: u64,
    pub rows_admitted: u64,
    /// Rows excluded because a filter failed at runtime
    pub filter_errors: u64,
    /// Rows whose derived-column script failed part-way
    pub derive_errors: u64,
    pub elapsed_ms: u64,
}

fn fill_fields(record: &ByteRecord, fields: &mut Vec<String>) {
    fields.clear();
    fields.extend(
        record
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned()),
    );
}

async fn next_row<R>(
    rdr: &mut AsyncReader<R>,
    record: &mut ByteRecord,
    fields: &mut Vec<String>,
) -> ScanResult<bool>
where
    R: AsyncRead + Unpin + Send,
{
    if !rdr.read_byte_record(record).await? {
        return Ok(false);
    }
    fill_fields(record, fields);
    Ok(true)
}

struct Counters {
    summary: PassSummary,
    last_report_bytes: u64,
}

/// Run one pass over `scan.file`. `make_sink` sees the resolved schema before
/// any row is streamed and may reject the request.
pub(crate) async fn run_pass<S, F>(
    scan: &ScanRequest,
    config: &EngineConfig,
    events: &Events,
    make_sink: F,
) -> ScanResult<(S, PassSummary, PassContext)>
where
    S: RowSink,
    F: FnOnce(&PassContext) -> ScanResult<S>,
{
    let started = Instant::now();
    let source = open_source(
        &scan.file,
        scan.zip_entry_name.as_deref(),
        scan.charset.as_deref(),
    )
    .await?;
    let progress = source.progress.clone();
    let total_bytes = source.total_bytes;
    let mut reader = source.reader;

    let mut sample = Vec::with_capacity(config.sniff_bytes);
    (&mut reader)
        .take(config.sniff_bytes as u64)
        .read_to_end(&mut sample)
        .await?;
    let complete = sample.len() < config.sniff_bytes;
    let mut lines = sample_lines(&sample, config.sniff_lines, complete);
    if lines.is_empty() {
        // a single line longer than the sample
        lines = sample_lines(&sample, config.sniff_lines, true);
    }
    if lines.is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let delimiter = detect_delimiter(&lines);

    let mut rdr = AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .comment(Some(COMMENT_PREFIX))
        .buffer_capacity(config.read_buffer)
        .create_reader(Cursor::new(sample).chain(reader));

    let mut record = ByteRecord::new();
    let mut fields: Vec<String> = Vec::new();
    if !next_row(&mut rdr, &mut record, &mut fields).await? {
        return Err(ScanError::EmptyInput);
    }
    if let Some(first) = fields.first_mut() {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }
    if fields.iter().all(|f| f.trim().is_empty()) {
        return Err(ScanError::EmptyInput);
    }
    let header = clean_header(&fields);

    let mut layout = RowLayout::from_header(header.clone());
    let mut evaluator = RowEvaluator::compile(
        &mut layout,
        scan.derived_column_script.as_deref(),
        &scan.filters(),
    )?;

    let overrides = header
        .iter()
        .map(|h| scan.type_overrides.get(h).copied())
        .collect();
    let mut detector = TypeDetector::new(overrides, config.detect_min_votes, config.detect_max_rows);
    let mut buffered: Vec<Vec<String>> = Vec::new();
    let mut exhausted = false;
    while !detector.is_done() {
        if !next_row(&mut rdr, &mut record, &mut fields).await? {
            exhausted = true;
            break;
        }
        detector.observe(&fields);
        buffered.push(fields.clone());
    }
    let header_types = detector.finish();

    let preview = &buffered[..buffered.len().min(config.derived_preview_rows)];
    let derived = infer_derived_types(
        &evaluator,
        &layout,
        &scan.derived_column_meta,
        preview,
        &header_types,
    );
    let schema = build_schema(scan, &header, &header_types, &layout, &derived);

    let ctx = PassContext {
        schema,
        layout,
        delimiter,
        source: source.meta.name_hint.clone(),
    };
    events
        .emit(Message::Header(HeaderInfo::new(&ctx)))
        .await;
    let mut sink = make_sink(&ctx)?;

    let mut counters = Counters {
        summary: PassSummary::default(),
        last_report_bytes: 0,
    };
    let mut row = Row::new(ctx.layout.len());
    let mut feed = |raw: &[String], counters: &mut Counters| {
        counters.summary.rows_read += 1;
        row.fill(raw, &header_types);
        if evaluator.evaluate(&mut row) == Verdict::Admitted {
            counters.summary.rows_admitted += 1;
            sink.accept(&row, raw);
        }
    };

    for raw in buffered {
        feed(&raw, &mut counters);
    }
    if !exhausted {
        while next_row(&mut rdr, &mut record, &mut fields).await? {
            feed(&fields, &mut counters);
            let bytes = progress.get();
            if counters.summary.rows_read % config.progress_rows.max(1) == 0
                || bytes - counters.last_report_bytes >= config.progress_bytes
            {
                counters.last_report_bytes = bytes;
                let report = Progress::new(counters.summary.rows_read, bytes, total_bytes);
                events.emit(Message::Progress(report)).await;
            }
        }
    }
    drop(feed);

    let mut summary = counters.summary;
    summary.filter_errors = evaluator.filter_errors();
    summary.derive_errors = evaluator.derive_errors();
    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok((sink, summary, ctx))
}

fn build_schema(
    scan: &ScanRequest,
    header: &[String],
    header_types: &[ColumnType],
    layout: &RowLayout,
    derived: &[(usize, ColumnType)],
) -> Schema {
    let column = |index: usize, name: &str, kind: ColumnType, origin: ColumnOrigin| Column {
        index,
        name: name.to_string(),
        kind,
        origin,
        skipped: scan.skipped_columns.iter().any(|s| s == name),
        filter: scan
            .per_column_value_filters
            .get(name)
            .copied()
            .unwrap_or_default(),
    };
    let mut columns: Vec<Column> = header
        .iter()
        .zip(header_types)
        .enumerate()
        .map(|(i, (name, kind))| column(i, name, *kind, ColumnOrigin::Header))
        .collect();
    columns.extend(
        derived
            .iter()
            .map(|&(slot, kind)| column(slot, layout.name(slot), kind, ColumnOrigin::Derived)),
    );
    Schema { columns }
}
