//! Statement date-window policy.
//!
//! Before the bank's cutover hour the statement covers yesterday→today,
//! afterwards today→today. A supervisor-supplied override (honored by the
//! KGB adapter only) bypasses the rule entirely.

use chrono::{Datelike, Duration, NaiveDate};

/// Inclusive statement window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    /// Apply the cutover rule to a wall-clock moment.
    pub fn for_moment(now: chrono::NaiveDateTime, cutover_hour: u32) -> DateWindow {
        use chrono::Timelike;
        let today = now.date();
        let from = if now.hour() < cutover_hour {
            today - Duration::days(1)
        } else {
            today
        };
        DateWindow { from, to: today }
    }

    /// `DD/MM/YYYY` rendering used by most of the Finacle-style portals.
    pub fn as_dmy(&self) -> (String, String) {
        (
            self.from.format("%d/%m/%Y").to_string(),
            self.to.format("%d/%m/%Y").to_string(),
        )
    }

    /// `MM/DD/YYYY` rendering (the IOB statement form).
    pub fn as_mdy(&self) -> (String, String) {
        (
            self.from.format("%m/%d/%Y").to_string(),
            self.to.format("%m/%d/%Y").to_string(),
        )
    }
}

/// Parse a `from DD/MM/YYYY to DD/MM/YYYY` override as given to `/run`.
pub fn parse_override(from: &str, to: &str) -> Option<DateWindow> {
    let from = NaiveDate::parse_from_str(from.trim(), "%d/%m/%Y").ok()?;
    let to = NaiveDate::parse_from_str(to.trim(), "%d/%m/%Y").ok()?;
    if from > to {
        return None;
    }
    Some(DateWindow { from, to })
}

/// Sanity helper for tests and logging.
pub fn same_day(w: &DateWindow) -> bool {
    w.from == w.to && w.from.year() == w.to.year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn before_cutover_spans_yesterday() {
        let w = DateWindow::for_moment(at(4, 59), 5);
        assert_eq!(w.from, NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
        assert_eq!(w.to, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }

    #[test]
    fn at_cutover_is_today_only() {
        let w = DateWindow::for_moment(at(5, 0), 5);
        assert!(same_day(&w));
    }

    #[test]
    fn six_oclock_banks_still_span_yesterday_at_five() {
        let w = DateWindow::for_moment(at(5, 30), 6);
        assert_eq!(w.from, NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
    }

    #[test]
    fn override_parses_and_orders() {
        let w = parse_override("01/02/2024", "03/02/2024").unwrap();
        assert_eq!(w.from, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(w.to, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());
        assert!(parse_override("03/02/2024", "01/02/2024").is_none());
        assert!(parse_override("2024-02-01", "2024-02-03").is_none());
    }

    #[test]
    fn dmy_and_mdy_renderings() {
        let w = parse_override("01/02/2024", "01/02/2024").unwrap();
        assert_eq!(w.as_dmy().0, "01/02/2024");
        assert_eq!(w.as_mdy().0, "02/01/2024");
    }
}
