//! Fixed-width line layout and record slicing
//!
//! A COTAHIST line is 245 bytes wide. Every field lives at a fixed byte
//! range, documented by B3 in the "SeriesHistoricas_Layout" sheet. The layout
//! also carries the field kind so the normalizer knows how to coerce each
//! value without a second table to keep in sync.

use crate::models::RawRecord;

/// Width of one COTAHIST record, excluding the line terminator
pub const RECORD_WIDTH: usize = 245;

/// Value of the record-date field on header (`00`) and trailer (`99`) rows
pub const HEADER_TRAILER_SENTINEL: &str = "COTAHIST";

/// How the normalizer coerces a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Cleaned string, null when blank
    Text,
    /// `YYYYMMDD`
    Date,
    /// Integer number of cents, two implied decimal places
    Amount,
    /// Plain integer
    Integer,
    /// Plain integer, blank or control-character garbage becomes 0
    IntegerOrZero,
}

/// One named half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub start: usize,
    pub end: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, start: usize, end: usize, kind: FieldKind) -> Self {
        Self {
            name,
            start,
            end,
            kind,
        }
    }

    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

use FieldKind::{Amount, Date, Integer, IntegerOrZero, Text};

static COTAHIST_FIELDS: [FieldSpec; 26] = [
    FieldSpec::new("record_type", 0, 2, Text),
    FieldSpec::new("trade_date", 2, 10, Date),
    FieldSpec::new("bdi_code", 10, 12, Text),
    FieldSpec::new("ticker", 12, 24, Text),
    FieldSpec::new("market_type", 24, 27, Text),
    FieldSpec::new("short_name", 27, 39, Text),
    FieldSpec::new("specification", 39, 49, Text),
    FieldSpec::new("forward_market_days", 49, 52, IntegerOrZero),
    FieldSpec::new("currency", 52, 56, Text),
    FieldSpec::new("open_price", 56, 69, Amount),
    FieldSpec::new("max_price", 69, 82, Amount),
    FieldSpec::new("min_price", 82, 95, Amount),
    FieldSpec::new("avg_price", 95, 108, Amount),
    FieldSpec::new("last_price", 108, 121, Amount),
    FieldSpec::new("best_bid_price", 121, 134, Amount),
    FieldSpec::new("best_ask_price", 134, 147, Amount),
    FieldSpec::new("trade_count", 147, 152, Integer),
    FieldSpec::new("quantity_traded", 152, 170, Integer),
    FieldSpec::new("volume_traded", 170, 188, Amount),
    FieldSpec::new("strike_price", 188, 201, Amount),
    FieldSpec::new("price_correction_indicator", 201, 202, Text),
    FieldSpec::new("expiration_date", 202, 210, Date),
    FieldSpec::new("quote_factor", 210, 217, Text),
    FieldSpec::new("strike_price_points", 217, 230, Amount),
    FieldSpec::new("isin_code", 230, 242, Text),
    FieldSpec::new("distribution_number", 242, 245, Text),
];

static COTAHIST: LineLayout = LineLayout {
    fields: &COTAHIST_FIELDS,
    width: RECORD_WIDTH,
    record_date_field: "trade_date",
};

/// Immutable description of one fixed-width record type
#[derive(Debug, PartialEq, Eq)]
pub struct LineLayout {
    fields: &'static [FieldSpec],
    width: usize,
    record_date_field: &'static str,
}

impl LineLayout {
    /// The B3 COTAHIST daily quotes layout
    pub fn cotahist() -> &'static LineLayout {
        &COTAHIST
    }

    /// Build a custom layout; call [`LineLayout::validate`] before use.
    pub const fn new(
        fields: &'static [FieldSpec],
        width: usize,
        record_date_field: &'static str,
    ) -> Self {
        Self {
            fields,
            width,
            record_date_field,
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Field compared against [`HEADER_TRAILER_SENTINEL`]
    pub fn record_date_field(&self) -> &'static str {
        self.record_date_field
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name)
    }

    /// Check that ranges are non-empty, contiguous from byte 0, and end at
    /// the declared width, and that the record-date field exists.
    pub fn validate(&self) -> Result<(), String> {
        let mut expected_start = 0;
        for field in self.fields {
            if field.start != expected_start {
                return Err(format!(
                    "field {} starts at {} but previous field ended at {}",
                    field.name, field.start, expected_start
                ));
            }
            if field.end <= field.start {
                return Err(format!("field {} has an empty range", field.name));
            }
            expected_start = field.end;
        }

        if expected_start != self.width {
            return Err(format!(
                "fields cover {} bytes, expected {}",
                expected_start, self.width
            ));
        }

        if self.field(self.record_date_field).is_none() {
            return Err(format!("record-date field {} is not in the layout", self.record_date_field));
        }

        Ok(())
    }

    /// Slice one raw line into its named fields.
    ///
    /// `line` may include its terminator. Bytes beyond the end of a short
    /// line contribute nothing, so a truncated final line yields partial or
    /// empty values rather than an error.
    pub fn slice(&self, line_index: u64, line: &[u8]) -> RawRecord {
        let mut record = RawRecord::with_capacity(line_index, self.fields.len());
        for field in self.fields {
            let start = field.start.min(line.len());
            let end = field.end.min(line.len());
            record.insert(field.name, decode_latin1(&line[start..end]));
        }
        record
    }
}

/// Decode ISO-8859-1 bytes. Every byte maps to the code point of the same
/// value, so this never fails and keeps control bytes intact.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use crate::fixtures::PETR4_LINE;

    #[test]
    fn test_cotahist_layout_is_contiguous() {
        let layout = LineLayout::cotahist();
        layout.validate().unwrap();
        let total: usize = layout.fields().iter().map(FieldSpec::width).sum();
        assert_eq!(total, RECORD_WIDTH);
        assert_eq!(layout.fields().last().unwrap().end, RECORD_WIDTH);
    }

    #[test]
    fn test_validate_rejects_gap() {
        static GAPPY: [FieldSpec; 2] = [
            FieldSpec::new("a", 0, 2, Text),
            FieldSpec::new("b", 3, 5, Text),
        ];
        let layout = LineLayout::new(&GAPPY, 5, "a");
        assert!(layout.validate().unwrap_err().contains("starts at 3"));
    }

    #[test]
    fn test_validate_rejects_wrong_width() {
        static SHORT: [FieldSpec; 1] = [FieldSpec::new("a", 0, 2, Date)];
        let layout = LineLayout::new(&SHORT, 4, "a");
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_slice_full_width_line() {
        assert_eq!(PETR4_LINE.len(), RECORD_WIDTH);
        let record = LineLayout::cotahist().slice(7, PETR4_LINE.as_bytes());

        assert_eq!(record.line_index, 7);
        assert_eq!(record.len(), 26);
        assert_eq!(record.get("record_type"), Some("01"));
        assert_eq!(record.get("trade_date"), Some("20030102"));
        assert_eq!(record.get("ticker"), Some("PETR4       "));
        assert_eq!(record.get("open_price"), Some("0000000005520"));
        assert_eq!(record.get("isin_code"), Some("BRPETRACNPR6"));
        assert_eq!(record.get("distribution_number"), Some("127"));
    }

    #[test]
    fn test_slice_ignores_terminator() {
        let line = format!("{}\r\n", PETR4_LINE);
        let record = LineLayout::cotahist().slice(0, line.as_bytes());
        assert_eq!(record.get("distribution_number"), Some("127"));
    }

    #[test]
    fn test_slice_short_line_yields_empty_tail() {
        let record = LineLayout::cotahist().slice(0, b"99COTAHIST.2003BOV\n");
        assert_eq!(record.get("trade_date"), Some("COTAHIST"));
        assert_eq!(record.get("bdi_code"), Some(".2"));
        assert_eq!(record.get("ticker"), Some("003BOV\n"));
        assert_eq!(record.get("market_type"), Some(""));
        assert_eq!(record.get("distribution_number"), Some(""));
    }

    #[test]
    fn test_decode_latin1_keeps_high_and_control_bytes() {
        assert_eq!(decode_latin1(&[0x41, 0xC7, 0x00]), "A\u{C7}\u{0}");
    }
}
