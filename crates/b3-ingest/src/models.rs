//! Record types passed between the extraction, normalization and load stages

use chrono::NaiveDate;
use sqlx::types::BigDecimal;
use std::collections::HashMap;
use std::fmt;

/// Field name to raw substring for one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Zero-based index of the line in its source file
    pub line_index: u64,
    fields: HashMap<&'static str, String>,
}

impl RawRecord {
    pub fn new(line_index: u64) -> Self {
        Self::with_capacity(line_index, 0)
    }

    pub fn with_capacity(line_index: u64, capacity: usize) -> Self {
        Self {
            line_index,
            fields: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, name: &'static str, value: String) {
        self.fields.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn into_fields(self) -> HashMap<&'static str, String> {
        self.fields
    }
}

/// A currency amount held as integer cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Exact two-decimal value for NUMERIC columns
    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::new(self.0.into(), 2)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Typed value of one normalized field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Date(NaiveDate),
    Amount(Amount),
    Integer(i64),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            FieldValue::Amount(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Cleaned, typed record ready for loading. Values are in layout order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub line_index: u64,
    pub values: Vec<(&'static str, FieldValue)>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount::from_cents(12345).to_string(), "123.45");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::from_cents(-250).to_string(), "-2.50");
        assert_eq!(Amount::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn test_amount_to_decimal() {
        assert_eq!(
            Amount::from_cents(12345).to_decimal(),
            BigDecimal::from_str("123.45").unwrap()
        );
    }

    #[test]
    fn test_normalized_record_lookup() {
        let record = NormalizedRecord {
            line_index: 3,
            values: vec![
                ("ticker", FieldValue::Text("PETR4".into())),
                ("trade_count", FieldValue::Integer(1320)),
            ],
        };
        assert_eq!(record.get("ticker").and_then(FieldValue::as_text), Some("PETR4"));
        assert_eq!(record.get("trade_count").and_then(FieldValue::as_integer), Some(1320));
        assert!(record.get("missing").is_none());
    }
}
