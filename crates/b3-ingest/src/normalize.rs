//! Cleaning and type coercion of raw batches
//!
//! Normalization runs in fixed steps over the whole batch:
//!
//! 1. drop header/trailer rows (record-date field equals `COTAHIST`)
//! 2. null out values containing legacy control sequences
//! 3. right-trim, and null out values left empty
//! 4. default blank `IntegerOrZero` values to `"0"`
//! 5. parse `Date` columns (`YYYYMMDD`)
//! 6. parse `Amount` columns (integer cents)
//! 7. parse `Integer` and `IntegerOrZero` columns
//!
//! Steps 1 to 4 never fail. Steps 5 to 7 fail the whole batch on the first
//! bad value; nothing from a failed batch is returned.

use chrono::NaiveDate;

use crate::error::{EtlError, Result};
use crate::layout::{FieldKind, LineLayout, HEADER_TRAILER_SENTINEL};
use crate::models::{Amount, FieldValue, NormalizedRecord, RawRecord};

/// Byte sequences seen in old COTAHIST releases where a value was garbled
pub const CONTROL_SEQUENCES: &[&str] = &[
    "\u{00}", "\u{01}", "\u{0f}", "\u{03}", "\u{07}", "\u{02}", "\t\"",
];

/// Output of [`normalize`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedBatch {
    pub records: Vec<NormalizedRecord>,
    /// Header and trailer rows dropped in step 1
    pub filtered: usize,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn normalize(layout: &LineLayout, batch: Vec<RawRecord>) -> Result<NormalizedBatch> {
    let raw_len = batch.len();
    let date_field = layout.record_date_field();

    // Step 1
    let kept: Vec<RawRecord> = batch
        .into_iter()
        .filter(|record| record.get(date_field) != Some(HEADER_TRAILER_SENTINEL))
        .collect();
    let filtered = raw_len - kept.len();

    // Steps 2-4
    let mut rows: Vec<NormalizedRecord> = kept
        .into_iter()
        .map(|record| clean_record(layout, record))
        .collect();

    // Steps 5-7
    coerce_columns(layout, &mut rows, &[FieldKind::Date], parse_date)?;
    coerce_columns(layout, &mut rows, &[FieldKind::Amount], parse_amount)?;
    coerce_columns(
        layout,
        &mut rows,
        &[FieldKind::Integer, FieldKind::IntegerOrZero],
        parse_integer,
    )?;

    Ok(NormalizedBatch {
        records: rows,
        filtered,
    })
}

fn clean_record(layout: &LineLayout, record: RawRecord) -> NormalizedRecord {
    let line_index = record.line_index;
    let mut fields = record.into_fields();

    let values = layout
        .fields()
        .iter()
        .map(|spec| {
            let raw = fields.remove(spec.name).unwrap_or_default();
            let value = match clean_value(raw) {
                Some(text) => FieldValue::Text(text),
                None if spec.kind == FieldKind::IntegerOrZero => FieldValue::Text("0".to_string()),
                None => FieldValue::Null,
            };
            (spec.name, value)
        })
        .collect();

    NormalizedRecord { line_index, values }
}

/// Steps 2 and 3 for a single value
pub fn clean_value(raw: String) -> Option<String> {
    if CONTROL_SEQUENCES.iter().any(|seq| raw.contains(seq)) {
        return None;
    }

    let trimmed = raw.trim_end();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == raw.len() {
        Some(raw)
    } else {
        Some(trimmed.to_string())
    }
}

type Parser = fn(u64, &'static str, &str) -> Result<FieldValue>;

fn coerce_columns(
    layout: &LineLayout,
    rows: &mut [NormalizedRecord],
    kinds: &[FieldKind],
    parse: Parser,
) -> Result<()> {
    for (column, spec) in layout.fields().iter().enumerate() {
        if !kinds.contains(&spec.kind) {
            continue;
        }
        for row in rows.iter_mut() {
            let slot = &mut row.values[column].1;
            let text = match slot {
                FieldValue::Text(text) => text.as_str(),
                FieldValue::Null => "",
                _ => continue,
            };
            *slot = parse(row.line_index, spec.name, text)?;
        }
    }
    Ok(())
}

/// Parse an 8-digit `YYYYMMDD` value
pub fn parse_date(line: u64, field: &'static str, value: &str) -> Result<FieldValue> {
    let malformed = || EtlError::MalformedDate {
        line,
        field,
        value: value.to_string(),
    };

    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let year = value[0..4].parse().map_err(|_| malformed())?;
    let month = value[4..6].parse().map_err(|_| malformed())?;
    let day = value[6..8].parse().map_err(|_| malformed())?;

    NaiveDate::from_ymd_opt(year, month, day)
        .map(FieldValue::Date)
        .ok_or_else(malformed)
}

/// Parse an integer number of cents
pub fn parse_amount(line: u64, field: &'static str, value: &str) -> Result<FieldValue> {
    value
        .trim_start()
        .parse::<i64>()
        .map(|cents| FieldValue::Amount(Amount::from_cents(cents)))
        .map_err(|_| EtlError::MalformedAmount {
            line,
            field,
            value: value.to_string(),
        })
}

pub fn parse_integer(line: u64, field: &'static str, value: &str) -> Result<FieldValue> {
    value
        .trim_start()
        .parse::<i64>()
        .map(FieldValue::Integer)
        .map_err(|_| EtlError::MalformedInteger {
            line,
            field,
            value: value.to_string(),
        })
}
