//! The threshold ladder and alert formatting.

use chrono::{DateTime, Local};

use crate::BalanceSample;

/// One rung: crossing `amount` carries this urgency and required action.
#[derive(Clone, Debug)]
pub struct ThresholdRung {
    pub amount: u64,
    pub urgency: &'static str,
    pub action: &'static str,
}

/// Ordered ladder with strictly ascending amounts. Fixed at startup.
#[derive(Clone, Debug)]
pub struct ThresholdLadder {
    rungs: Vec<ThresholdRung>,
}

impl Default for ThresholdLadder {
    /// The INR production ladder.
    fn default() -> Self {
        ThresholdLadder::new(vec![
            ThresholdRung {
                amount: 50_000,
                urgency: "LOW PRIORITY",
                action: "Monitor account activity",
            },
            ThresholdRung {
                amount: 60_000,
                urgency: "LOW-MEDIUM PRIORITY",
                action: "Watch closely and prepare for fund transfer",
            },
            ThresholdRung {
                amount: 70_000,
                urgency: "MEDIUM PRIORITY",
                action: "TRANSFER FUNDS URGENTLY to prevent exceeding limits",
            },
            ThresholdRung {
                amount: 90_000,
                urgency: "HIGH PRIORITY",
                action: "IMMEDIATE ACTION REQUIRED: transfer funds now, \
                         account approaching critical limit",
            },
            ThresholdRung {
                amount: 100_000,
                urgency: "CRITICAL ALERT",
                action: "STOP ALL OPERATIONS IMMEDIATELY and transfer funds right now. \
                         Account has exceeded the 1,00,000 limit; \
                         risk of suspension or regulatory issues.",
            },
        ])
    }
}

impl ThresholdLadder {
    /// Build a ladder, asserting strictly ascending amounts.
    pub fn new(rungs: Vec<ThresholdRung>) -> Self {
        debug_assert!(
            rungs.windows(2).all(|w| w[0].amount < w[1].amount),
            "ladder amounts must be strictly ascending"
        );
        ThresholdLadder { rungs }
    }

    pub fn rungs(&self) -> &[ThresholdRung] {
        &self.rungs
    }

    /// Highest rung with `balance >= amount`, if any.
    pub fn highest_crossed(&self, balance: f64) -> Option<&ThresholdRung> {
        self.rungs
            .iter()
            .rev()
            .find(|rung| balance >= rung.amount as f64)
    }

    /// Lowest rung not yet reached by `balance` (for `/balances`).
    pub fn next_rung(&self, balance: f64) -> Option<&ThresholdRung> {
        self.rungs
            .iter()
            .find(|rung| balance < rung.amount as f64)
    }

    /// All rung amounts up to and including `amount` (the crossed prefix).
    pub fn rungs_up_to(&self, amount: u64) -> Vec<u64> {
        self.rungs
            .iter()
            .map(|r| r.amount)
            .filter(|a| *a <= amount)
            .collect()
    }
}

/// Render one alert message (Telegram HTML).
pub fn format_alert(
    sample: &BalanceSample,
    balance: f64,
    rung: &ThresholdRung,
    is_repeat: bool,
    now: DateTime<Local>,
) -> String {
    let masked = if sample.account_number.len() > 4 {
        format!(
            "****{}",
            &sample.account_number[sample.account_number.len() - 4..]
        )
    } else {
        sample.account_number.clone()
    };

    let mut out = String::new();
    if rung.amount >= 90_000 {
        out.push_str(&format!("<b>{} - Balance alert</b>\n", rung.urgency));
    } else {
        out.push_str(&format!("<b>Balance alert</b> ({})\n", rung.urgency));
    }
    if is_repeat {
        out.push_str("<i>Repeated alert, still above threshold</i>\n");
    }
    out.push('\n');
    out.push_str(&format!("Alias: <code>{}</code>\n", sample.alias));
    if !sample.bank_label.is_empty() {
        out.push_str(&format!("Bank: {}\n", sample.bank_label));
    }
    out.push_str(&format!("Account: <code>{masked}</code>\n"));
    out.push_str(&format!("Time: {}\n\n", now.format("%d/%m/%Y %H:%M:%S")));
    out.push_str(&format!(
        "Current balance: <code>\u{20b9}{balance:.2}</code>\n\
         Threshold crossed: <code>\u{20b9}{}</code>\n\
         Excess: <code>\u{20b9}{:.2}</code>\n\n",
        rung.amount,
        balance - rung.amount as f64
    ));
    out.push_str(&format!("Required action: {}\n", rung.action));
    if is_repeat {
        out.push_str("\n<i>Alert repeats every 5 minutes until the balance drops.</i>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_crossed_picks_from_the_top() {
        let ladder = ThresholdLadder::default();
        assert!(ladder.highest_crossed(49_999.99).is_none());
        assert_eq!(ladder.highest_crossed(50_000.0).unwrap().amount, 50_000);
        assert_eq!(ladder.highest_crossed(72_500.0).unwrap().amount, 70_000);
        assert_eq!(ladder.highest_crossed(250_000.0).unwrap().amount, 100_000);
    }

    #[test]
    fn next_rung_is_the_first_unreached() {
        let ladder = ThresholdLadder::default();
        assert_eq!(ladder.next_rung(10_000.0).unwrap().amount, 50_000);
        assert_eq!(ladder.next_rung(72_500.0).unwrap().amount, 90_000);
        assert!(ladder.next_rung(150_000.0).is_none());
    }

    #[test]
    fn crossed_prefix_is_downward_closed() {
        let ladder = ThresholdLadder::default();
        assert_eq!(ladder.rungs_up_to(70_000), vec![50_000, 60_000, 70_000]);
        assert_eq!(ladder.rungs_up_to(50_000), vec![50_000]);
    }

    #[test]
    fn alert_message_carries_the_masked_account_and_repeat_marker() {
        let sample = BalanceSample {
            alias: "acme_tmb".into(),
            bank_label: "TMB".into(),
            account_number: "1234567890".into(),
            balance_text: Some("x".into()),
        };
        let ladder = ThresholdLadder::default();
        let rung = ladder.highest_crossed(72_500.0).unwrap();
        let msg = format_alert(&sample, 72_500.0, rung, true, Local::now());
        assert!(msg.contains("Balance alert"));
        assert!(msg.contains("****7890"));
        assert!(!msg.contains("1234567890"));
        assert!(msg.contains("Repeated"));
    }
}
