//! SQL identifier validation
//!
//! Schema and table names reach the store from CLI flags, environment
//! variables and file names, so they are interpolated into DDL and DML.
//! Only lower-case ASCII identifiers are accepted, and they are always
//! emitted double-quoted.

use crate::error::{CommonError, Result};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a SQL identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    let invalid = |reason: &str| CommonError::InvalidIdentifier {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("identifier is empty"));
    };

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("identifier is longer than 63 bytes"));
    }

    if !(first.is_ascii_lowercase() || first == '_') {
        return Err(invalid("must start with a lower-case letter or underscore"));
    }

    if let Some(bad) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')) {
        return Err(invalid(&format!("prohibited character {:?}", bad)));
    }

    Ok(())
}

/// Double-quote an identifier for interpolation into SQL.
///
/// Callers are expected to have run [`validate_identifier`] first; embedded
/// quotes are still doubled so the output is always a single identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a `schema.table` pair.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_identifiers() {
        assert!(validate_identifier("b3_history").is_ok());
        assert!(validate_identifier("cotahist_a1986").is_ok());
        assert!(validate_identifier("_staging").is_ok());
    }

    #[test]
    fn test_rejects_injection_characters() {
        for name in ["b3'history", "b3\"history", "b3.history", "b3-history", "b3;drop"] {
            assert!(validate_identifier(name).is_err(), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_rejects_empty_uppercase_and_leading_digit() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("COTAHIST").is_err());
        assert!(validate_identifier("1986").is_err());
    }

    #[test]
    fn test_rejects_overlong_identifier() {
        let name = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        let err = validate_identifier(&name).unwrap_err();
        assert!(err.to_string().contains("63"));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier("b3_history"), "\"b3_history\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(
            qualified_name("b3_history", "cotahist_a1986"),
            "\"b3_history\".\"cotahist_a1986\""
        );
    }
}
