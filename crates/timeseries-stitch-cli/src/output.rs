use std::{io::Write, sync::Arc};

use arrow::{
    array::{ArrayRef, RecordBatch, StringArray, TimestampSecondArray, UInt64Array},
    compute::cast,
    datatypes::{DataType, Field, Schema, TimeUnit},
    error::ArrowError,
    util::display::{ArrayFormatter, FormatOptions},
};
use chrono::Duration;
use snafu::ResultExt;
use tabled::{
    builder::Builder,
    settings::{Style, object::Rows, style::LineText, width::MinWidth},
};
use timeseries_stitch_core::{Table, segment::Segment};

use crate::error::{ArrowSnafu, CliResult, WriteOutputSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Preview,
    Csv,
    Jsonl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Rfc3339,
    Unix,
}

#[derive(Debug, Clone)]
pub struct OutputOpts {
    pub format: OutputFormat,
    pub time_format: TimeFormat,
    pub max_rows: usize,
}

const UTC: &str = "UTC";

fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }

    const PREVIEW_LABEL: &str = "Preview output";
    const PREVIEW_OFFSET: usize = 6;
    let min_width = PREVIEW_OFFSET + PREVIEW_LABEL.len() + 4;

    let mut builder = Builder::default();
    builder.push_record(columns);
    for row in rows {
        builder.push_record(row);
    }

    let mut table = builder.build();

    table.with(Style::rounded());
    table.with(MinWidth::new(min_width));
    table.with(LineText::new(PREVIEW_LABEL, Rows::first()).offset(PREVIEW_OFFSET));
    // LineText re-estimates dimensions, so re-apply MinWidth afterwards.
    table.with(MinWidth::new(min_width));
    table.to_string()
}

/// Render timestamp columns as Unix seconds when requested.
fn apply_time_format(batch: &RecordBatch, time_format: TimeFormat) -> Result<RecordBatch, ArrowError> {
    if time_format == TimeFormat::Rfc3339 {
        return Ok(batch.clone());
    }

    let schema = batch.schema();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        if matches!(field.data_type(), DataType::Timestamp(..)) {
            fields.push(Field::new(field.name(), DataType::Int64, field.is_nullable()));
            arrays.push(cast(array, &DataType::Int64)?);
        } else {
            fields.push(field.as_ref().clone());
            arrays.push(Arc::clone(array));
        }
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

fn preview_rows(
    batches: &[RecordBatch],
    max_rows: usize,
) -> Result<(Vec<String>, Vec<Vec<String>>), ArrowError> {
    let columns = batches
        .first()
        .map(|b| {
            b.schema()
                .fields()
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let options = FormatOptions::default().with_null("null");
    let mut rows = Vec::new();
    let mut left = max_rows;
    for batch in batches {
        if left == 0 {
            break;
        }
        let formatters = batch
            .columns()
            .iter()
            .map(|col| ArrayFormatter::try_new(col.as_ref(), &options))
            .collect::<Result<Vec<_>, ArrowError>>()?;

        let take = left.min(batch.num_rows());
        for row_idx in 0..take {
            let mut row = Vec::with_capacity(formatters.len());
            for formatter in &formatters {
                row.push(formatter.value(row_idx).try_to_string()?);
            }
            rows.push(row);
        }
        left -= take;
    }
    Ok((columns, rows))
}

/// Write `batches` to `out` in the requested format.
pub fn write_batches<W: Write>(
    batches: &[RecordBatch],
    opts: &OutputOpts,
    out: &mut W,
) -> CliResult<()> {
    let batches = batches
        .iter()
        .map(|b| apply_time_format(b, opts.time_format))
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu)?;

    match opts.format {
        OutputFormat::Csv => {
            let mut writer = arrow_csv::WriterBuilder::new().build(&mut *out);
            for batch in &batches {
                writer.write(batch).context(ArrowSnafu)?;
            }
        }
        OutputFormat::Jsonl => {
            let mut writer = arrow_json::LineDelimitedWriter::new(&mut *out);
            let refs: Vec<&RecordBatch> = batches.iter().collect();
            writer.write_batches(&refs).context(ArrowSnafu)?;
            writer.finish().context(ArrowSnafu)?;
        }
        OutputFormat::Preview => {
            let total: usize = batches.iter().map(|b| b.num_rows()).sum();
            let (columns, rows) = preview_rows(&batches, opts.max_rows).context(ArrowSnafu)?;
            if !rows.is_empty() || (opts.max_rows == 0 && !columns.is_empty()) {
                writeln!(out, "{}", render_table(&columns, &rows)).context(WriteOutputSnafu)?;
            }
            if total == 0 {
                writeln!(out, "(no rows)").context(WriteOutputSnafu)?;
            } else if opts.max_rows == 0 {
                writeln!(out, "(preview suppressed; use --max-rows > 0)")
                    .context(WriteOutputSnafu)?;
            }
            writeln!(out, "total_rows: {total}").context(WriteOutputSnafu)?;
        }
    }
    out.flush().context(WriteOutputSnafu)
}

/// Write one table to stdout.
pub fn print_table(table: &Table, opts: &OutputOpts) -> CliResult<()> {
    let batch = table.to_record_batch().context(ArrowSnafu)?;
    write_batches(&[batch], opts, &mut std::io::stdout().lock())
}

/// Write every segment's rows to stdout, tagged with a leading `segment`
/// index column.
pub fn print_segment_rows(segments: &[Segment], opts: &OutputOpts) -> CliResult<()> {
    let batches = segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let batch = segment.table().to_record_batch()?;
            with_segment_index(&batch, index)
        })
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu)?;
    write_batches(&batches, opts, &mut std::io::stdout().lock())
}

/// Write one summary row per segment to stdout.
pub fn print_segment_summary(segments: &[Segment], opts: &OutputOpts) -> CliResult<()> {
    let batch = segment_summary(segments).context(ArrowSnafu)?;
    write_batches(&[batch], opts, &mut std::io::stdout().lock())
}

fn with_segment_index(batch: &RecordBatch, index: usize) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let mut fields = vec![Field::new("segment", DataType::UInt64, false)];
    fields.extend(schema.fields().iter().map(|f| f.as_ref().clone()));

    let mut arrays: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(vec![
        index as u64;
        batch.num_rows()
    ]))];
    arrays.extend(batch.columns().iter().cloned());

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

pub fn segment_summary(segments: &[Segment]) -> Result<RecordBatch, ArrowError> {
    let timestamp = DataType::Timestamp(TimeUnit::Second, Some(UTC.into()));
    let schema = Schema::new(vec![
        Field::new("segment", DataType::UInt64, false),
        Field::new("start", timestamp.clone(), false),
        Field::new("end", timestamp, false),
        Field::new("rows", DataType::UInt64, false),
        Field::new("duration", DataType::Utf8, false),
    ]);

    let index: Vec<u64> = (0..segments.len() as u64).collect();
    let starts: Vec<i64> = segments.iter().map(|s| s.start().timestamp()).collect();
    let ends: Vec<i64> = segments.iter().map(|s| s.end().timestamp()).collect();
    let rows: Vec<u64> = segments.iter().map(|s| s.len() as u64).collect();
    let durations: Vec<String> = segments.iter().map(|s| format_duration(s.duration())).collect();

    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(UInt64Array::from(index)),
            Arc::new(TimestampSecondArray::from(starts).with_timezone(UTC)),
            Arc::new(TimestampSecondArray::from(ends).with_timezone(UTC)),
            Arc::new(UInt64Array::from(rows)),
            Arc::new(StringArray::from(durations)),
        ],
    )
}

/// `1d 2h 5m`, dropping zero parts; seconds only appear when non-zero.
fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    let parts = [
        (total / 86_400, "d"),
        (total % 86_400 / 3600, "h"),
        (total % 3600 / 60, "m"),
        (total % 60, "s"),
    ];
    let rendered: Vec<String> = parts
        .iter()
        .filter(|(n, _)| *n != 0)
        .map(|(n, unit)| format!("{n}{unit}"))
        .collect();
    if rendered.is_empty() {
        "0s".to_string()
    } else {
        rendered.join(" ")
    }
}
