//! Sample COTAHIST lines shared by unit tests

use crate::layout::RECORD_WIDTH;

pub(crate) const PETR4_LINE: &str = "012003010202PETR4       010PETROBRAS   PN           R$  000000000552000000000055700000000005420000000000550800000000055450000000005540000000000555001320000000000002034000000000000112043304000000000000009999123100000010000000000000BRPETRACNPR6127";

pub(crate) fn header_line() -> String {
    format!("{:<width$}", "00COTAHIST.2003BOVESPA 20040130", width = RECORD_WIDTH)
}

pub(crate) fn trailer_line(records: u64) -> String {
    format!(
        "{:<width$}",
        format!("99COTAHIST.2003BOVESPA 20040130{:011}", records),
        width = RECORD_WIDTH
    )
}

/// PETR4 quote line with the trade date and opening price swapped in
pub(crate) fn quote_line(trade_date: &str, open_cents: u64) -> String {
    let mut line = PETR4_LINE.to_string();
    line.replace_range(2..10, trade_date);
    line.replace_range(56..69, &format!("{:013}", open_cents));
    line
}

/// Join lines with `\n`, terminating the last one too
pub(crate) fn text_source(lines: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    out
}
