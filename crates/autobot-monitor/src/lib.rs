//! autobot-monitor — balance monitoring with escalating urgency alerts.
//!
//! A single periodic task scans every live worker's last-known balance
//! against an ordered threshold ladder and alerts the configured groups,
//! repeating every five minutes while a balance stays above a rung. Alerts
//! auto-clear when the balance drops below the whole ladder and can be
//! cleared explicitly from the chat.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use autobot_core::constants::{
    ALERT_REPEAT_INTERVAL, BALANCE_CHECK_INTERVAL_MIN_SECS, BALANCE_CHECK_INTERVAL_SECS,
};
use autobot_messenger::Messenger;

mod ladder;
mod parse;

pub use ladder::{ThresholdLadder, ThresholdRung};
pub use parse::parse_balance_amount;

// ── Sampling ─────────────────────────────────────────────────────────────────

/// One live worker's monitor-relevant state, as sampled each tick.
#[derive(Clone, Debug)]
pub struct BalanceSample {
    pub alias: String,
    pub bank_label: String,
    pub account_number: String,
    pub balance_text: Option<String>,
}

/// Produces the current samples (alive workers only). The binary wires this
/// to the registry; tests script it.
pub type Sampler = Box<dyn Fn() -> Vec<BalanceSample> + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub repeat_interval: Duration,
    pub alert_chat_ids: Vec<i64>,
}

impl MonitorConfig {
    /// Clamp the scan interval to the 60 s floor.
    pub fn new(check_interval_secs: u64, alert_chat_ids: Vec<i64>) -> Self {
        let clamped = check_interval_secs.max(BALANCE_CHECK_INTERVAL_MIN_SECS);
        if clamped != check_interval_secs {
            warn!(
                configured = check_interval_secs,
                used = clamped,
                "balance check interval below the floor; clamped"
            );
        }
        MonitorConfig {
            check_interval: Duration::from_secs(clamped),
            repeat_interval: ALERT_REPEAT_INTERVAL,
            alert_chat_ids,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig::new(BALANCE_CHECK_INTERVAL_SECS, Vec::new())
    }
}

// ── Alert bookkeeping ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
struct AlertState {
    last_alert_at: Option<DateTime<Local>>,
    triggered_amounts: BTreeSet<u64>,
}

/// Monitor status, as shown by `/alerts`.
#[derive(Clone, Debug)]
pub struct MonitorStatus {
    pub alert_groups: usize,
    pub check_interval: Duration,
    pub repeat_interval: Duration,
    pub monitored_aliases: usize,
    pub total_triggered: usize,
}

// ── BalanceMonitor ───────────────────────────────────────────────────────────

pub struct BalanceMonitor {
    config: MonitorConfig,
    ladder: ThresholdLadder,
    messenger: Messenger,
    sampler: Sampler,
    alerts: Mutex<BTreeMap<String, AlertState>>,
}

impl BalanceMonitor {
    pub fn new(
        config: MonitorConfig,
        ladder: ThresholdLadder,
        messenger: Messenger,
        sampler: Sampler,
    ) -> Arc<Self> {
        info!(
            groups = config.alert_chat_ids.len(),
            interval_secs = config.check_interval.as_secs(),
            repeat_secs = config.repeat_interval.as_secs(),
            "balance monitor initialized"
        );
        Arc::new(BalanceMonitor {
            config,
            ladder,
            messenger,
            sampler,
            alerts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Spawn the periodic scan. Disabled (with a log line) when no alert
    /// groups are configured.
    pub fn spawn(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.alert_chat_ids.is_empty() {
            warn!("no alert groups configured; balance monitoring disabled");
            return None;
        }
        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!("balance monitor loop started");
            loop {
                let m = Arc::clone(&monitor);
                // The tick talks to the blocking messenger; keep it off the
                // async threads.
                let _ = tokio::task::spawn_blocking(move || m.tick(Local::now())).await;
                tokio::time::sleep(monitor.config.check_interval).await;
            }
        }))
    }

    /// One scan pass. Pure with respect to the wall clock, so the tests feed
    /// synthetic `now` values.
    pub fn tick(&self, now: DateTime<Local>) {
        let samples = (self.sampler)();
        let mut checked = 0usize;
        let mut alerted = 0usize;

        for sample in samples {
            let Some(text) = sample.balance_text.as_deref() else {
                continue;
            };
            checked += 1;
            // Unparseable balances are silently treated as "no threshold".
            let Some(balance) = parse_balance_amount(text) else {
                debug!(alias = %sample.alias, text, "balance did not parse");
                continue;
            };

            let Some(rung) = self.ladder.highest_crossed(balance) else {
                self.auto_clear(&sample.alias, balance);
                continue;
            };

            let (due, is_repeat) = {
                let alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
                match alerts.get(&sample.alias).and_then(|s| s.last_alert_at) {
                    None => (true, false),
                    Some(last) => {
                        let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
                        (elapsed >= self.config.repeat_interval, true)
                    }
                }
            };
            if !due {
                continue;
            }

            let message = ladder::format_alert(&sample, balance, rung, is_repeat, now);
            let mut delivered = false;
            for chat_id in &self.config.alert_chat_ids {
                match self.messenger.send_direct(*chat_id, message.clone()) {
                    Ok(()) => delivered = true,
                    Err(e) => warn!(chat_id, error = %e, "alert delivery failed"),
                }
            }

            // An undelivered alert leaves last_alert_at alone so the next
            // tick retries.
            if delivered {
                alerted += 1;
                let mut alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
                let state = alerts.entry(sample.alias.clone()).or_default();
                state.last_alert_at = Some(now);
                for crossed in self.ladder.rungs_up_to(rung.amount) {
                    state.triggered_amounts.insert(crossed);
                }
                info!(
                    alias = %sample.alias,
                    amount = rung.amount,
                    repeat = is_repeat,
                    "balance alert sent"
                );
            }
        }

        if checked > 0 {
            debug!(checked, alerted, "balance scan complete");
        }
    }

    fn auto_clear(&self, alias: &str, balance: f64) {
        let mut alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
        if alerts.remove(alias).is_some() {
            info!(alias, balance, "balance dropped below all thresholds; alerts cleared");
        }
    }

    /// `ResetAlerts(alias)`.
    pub fn reset_alias(&self, alias: &str) -> bool {
        let removed = self
            .alerts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(alias)
            .is_some();
        if removed {
            info!(alias, "alerts reset");
        }
        removed
    }

    /// `ResetAlerts(all)`.
    pub fn reset_all(&self) -> usize {
        let mut alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
        let count = alerts.len();
        alerts.clear();
        info!(count, "all alerts reset");
        count
    }

    pub fn status(&self) -> MonitorStatus {
        let alerts = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
        MonitorStatus {
            alert_groups: self.config.alert_chat_ids.len(),
            check_interval: self.config.check_interval,
            repeat_interval: self.config.repeat_interval,
            monitored_aliases: alerts.len(),
            total_triggered: alerts.values().map(|s| s.triggered_amounts.len()).sum(),
        }
    }

    /// Triggered amounts for one alias (test and `/balances` helper).
    pub fn triggered(&self, alias: &str) -> Vec<u64> {
        self.alerts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(alias)
            .map(|s| s.triggered_amounts.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ladder(&self) -> &ThresholdLadder {
        &self.ladder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_messenger::memory::MemoryTransport;
    use chrono::Duration as ChronoDuration;

    fn sample(balance: &str) -> BalanceSample {
        BalanceSample {
            alias: "acme_tmb".into(),
            bank_label: "TMB".into(),
            account_number: "1234567890".into(),
            balance_text: Some(balance.into()),
        }
    }

    struct Rig {
        monitor: Arc<BalanceMonitor>,
        log: Arc<Mutex<Vec<String>>>,
        balance: Arc<Mutex<String>>,
        messenger: Messenger,
    }

    fn rig_with(transport: MemoryTransport) -> Rig {
        let log = transport.log();
        let messenger = Messenger::spawn(Box::new(transport), 1, false);

        let balance = Arc::new(Mutex::new("₹10,000.00".to_string()));
        let sampler_balance = Arc::clone(&balance);
        let monitor = BalanceMonitor::new(
            MonitorConfig::new(180, vec![-100]),
            ThresholdLadder::default(),
            messenger.clone(),
            Box::new(move || vec![sample(&sampler_balance.lock().unwrap())]),
        );
        Rig {
            monitor,
            log,
            balance,
            messenger,
        }
    }

    fn rig() -> Rig {
        rig_with(MemoryTransport::new())
    }

    fn alerts_in(log: &Arc<Mutex<Vec<String>>>) -> usize {
        log.lock().unwrap().iter().filter(|e| e.contains("Balance alert")).count()
    }

    #[test]
    fn interval_below_floor_is_clamped() {
        let cfg = MonitorConfig::new(30, vec![1]);
        assert_eq!(cfg.check_interval, Duration::from_secs(60));
    }

    #[test]
    fn crossing_alerts_once_then_repeats_after_interval() {
        let rig = rig();
        let t0 = Local::now();
        *rig.balance.lock().unwrap() = "₹72,500.00".into();

        rig.monitor.tick(t0);
        assert_eq!(alerts_in(&rig.log), 1);
        // Highest crossed rung is 70 000 and the triggered set is the
        // downward-closed prefix below it.
        assert_eq!(rig.monitor.triggered("acme_tmb"), vec![50_000, 60_000, 70_000]);

        // Next tick inside the repeat window: silence.
        rig.monitor.tick(t0 + ChronoDuration::seconds(180));
        assert_eq!(alerts_in(&rig.log), 1);

        // Past the 300 s repeat interval: one repeat alert.
        rig.monitor.tick(t0 + ChronoDuration::seconds(301));
        assert_eq!(alerts_in(&rig.log), 2);
        let entries = rig.log.lock().unwrap();
        assert!(entries.last().unwrap().contains("Repeated"));
        drop(entries);

        // Balance drops below the whole ladder: auto-clear, no new alerts.
        *rig.balance.lock().unwrap() = "₹45,000.00".into();
        rig.monitor.tick(t0 + ChronoDuration::seconds(360));
        assert_eq!(alerts_in(&rig.log), 2);
        assert!(rig.monitor.triggered("acme_tmb").is_empty());

        // Re-crossing after the auto-clear alerts again immediately.
        *rig.balance.lock().unwrap() = "₹72,500.00".into();
        rig.monitor.tick(t0 + ChronoDuration::seconds(420));
        assert_eq!(alerts_in(&rig.log), 3);

        rig.messenger.close();
    }

    #[test]
    fn failed_delivery_keeps_the_alert_due_for_the_next_tick() {
        let transport = MemoryTransport::new();
        // Eat the full retry budget of the first delivery.
        transport.fail_next(3);
        let rig = rig_with(transport);
        *rig.balance.lock().unwrap() = "₹72,500.00".into();

        let t0 = Local::now();
        rig.monitor.tick(t0);
        assert_eq!(alerts_in(&rig.log), 0);
        assert!(rig.monitor.triggered("acme_tmb").is_empty());

        // Well inside the repeat window, but lastAlertAt never advanced.
        rig.monitor.tick(t0 + ChronoDuration::seconds(10));
        assert_eq!(alerts_in(&rig.log), 1);
        rig.messenger.close();
    }

    #[test]
    fn unparseable_balance_is_silent() {
        let rig = rig();
        *rig.balance.lock().unwrap() = "layout changed, no number here".into();
        rig.monitor.tick(Local::now());
        assert_eq!(alerts_in(&rig.log), 0);
        assert!(rig.monitor.triggered("acme_tmb").is_empty());
        rig.messenger.close();
    }

    #[test]
    fn manual_reset_clears_state() {
        let rig = rig();
        *rig.balance.lock().unwrap() = "₹95,000".into();
        rig.monitor.tick(Local::now());
        assert!(!rig.monitor.triggered("acme_tmb").is_empty());

        assert!(rig.monitor.reset_alias("acme_tmb"));
        assert!(rig.monitor.triggered("acme_tmb").is_empty());
        assert!(!rig.monitor.reset_alias("acme_tmb"));
        rig.messenger.close();
    }

    #[test]
    fn status_counts_monitored_aliases() {
        let rig = rig();
        *rig.balance.lock().unwrap() = "₹1,05,000".into();
        rig.monitor.tick(Local::now());
        let status = rig.monitor.status();
        assert_eq!(status.monitored_aliases, 1);
        assert_eq!(status.total_triggered, 5);
        assert_eq!(status.repeat_interval, Duration::from_secs(300));
        rig.messenger.close();
    }
}
