//! Balance-string parsing.
//!
//! Portals render balances every which way: "₹12,345.67", "INR 12345.67",
//! "12,345.67 CR", "Available: 12345.67". The rule: strip currency symbols,
//! whitespace and commas, drop a trailing CR/DR/CREDIT/DEBIT marker, then
//! take the first numeric token. Anything else is unparseable (and the
//! monitor treats that silently).

/// Parse a portal-rendered balance into a number, or `None`.
pub fn parse_balance_amount(text: &str) -> Option<f64> {
    if text.trim().is_empty() {
        return None;
    }

    let upper = text.to_uppercase();
    let cleaned: String = upper
        .chars()
        .filter(|c| !matches!(c, '₹' | '$' | '€' | '£' | 'I' | 'N' | 'R' | ',') && !c.is_whitespace())
        .collect();

    let cleaned = strip_trailing_marker(&cleaned);

    // First run of digits (with an optional embedded decimal point).
    let start = cleaned.find(|c: char| c.is_ascii_digit())?;
    let token: String = cleaned[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    token.parse::<f64>().ok()
}

/// Drop a trailing credit/debit marker (what is left of one after the
/// character strip above).
fn strip_trailing_marker(s: &str) -> &str {
    for marker in ["CREDIT", "DEBIT", "CEDT", "DEBT", "CR", "DR", "C", "D"] {
        if let Some(stripped) = s.strip_suffix(marker) {
            return stripped;
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_formats_parse() {
        assert_eq!(parse_balance_amount("₹12,345.67"), Some(12345.67));
        assert_eq!(parse_balance_amount("INR 12345.67"), Some(12345.67));
        assert_eq!(parse_balance_amount("12,345.67 INR"), Some(12345.67));
        assert_eq!(parse_balance_amount("12345.67"), Some(12345.67));
        assert_eq!(parse_balance_amount("₹1,05,000"), Some(105000.0));
    }

    #[test]
    fn credit_debit_suffixes_are_stripped() {
        assert_eq!(parse_balance_amount("12345.67 CR"), Some(12345.67));
        assert_eq!(parse_balance_amount("12,345.67 dr"), Some(12345.67));
        assert_eq!(parse_balance_amount("72,500.00 CREDIT"), Some(72500.0));
    }

    #[test]
    fn leading_labels_are_skipped() {
        assert_eq!(parse_balance_amount("Available: 12345.67"), Some(12345.67));
        assert_eq!(parse_balance_amount("$ 9,999"), Some(9999.0));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_balance_amount(""), None);
        assert_eq!(parse_balance_amount("   "), None);
        assert_eq!(parse_balance_amount("no balance shown"), None);
    }
}
