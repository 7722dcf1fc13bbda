//! The command surface: chat text in, supervisor operations out.
//!
//! Parsing and dispatch are synchronous and pure with respect to the chat
//! transport, so the whole surface is testable without Telegram. Plain
//! (non-command) text serves two masters: an in-flight `/edit` dialogue, and
//! otherwise the OTP/CAPTCHA broadcast. Any 6-digit message feeds every
//! live worker's OTP and CAPTCHA inboxes, any compact 4-8 alphanumeric feeds
//! the CAPTCHA inboxes. That is deliberately promiscuous (kept from the
//! original system): only workers currently waiting consume a code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use autobot_browser::download::newest_statement_file;
use autobot_core::datewindow::{self, DateWindow};
use autobot_core::{AutobotError, Credential, CredentialField};
use autobot_monitor::{parse_balance_amount, BalanceMonitor};
use autobot_supervisor::{StopOutcome, Supervisor};

/// What a handled message sends back.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    Document { path: PathBuf, caption: String },
}

struct PendingEdit {
    alias: String,
    field: Option<CredentialField>,
}

pub struct CommandCtx {
    supervisor: Arc<Supervisor>,
    monitor: Arc<BalanceMonitor>,
    download_root: PathBuf,
    pending_edit: Mutex<HashMap<i64, PendingEdit>>,
}

impl CommandCtx {
    pub fn new(
        supervisor: Arc<Supervisor>,
        monitor: Arc<BalanceMonitor>,
        download_root: PathBuf,
    ) -> Self {
        CommandCtx {
            supervisor,
            monitor,
            download_root,
            pending_edit: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound message and produce the replies.
    pub fn handle(&self, chat_id: i64, text: &str) -> Vec<Reply> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if let Some(rest) = text.strip_prefix('/') {
            let (command, args) = match rest.split_once(char::is_whitespace) {
                Some((c, a)) => (c, a.trim()),
                None => (rest, ""),
            };
            return self.dispatch(chat_id, command, args);
        }
        self.plain_text(chat_id, text)
    }

    fn dispatch(&self, chat_id: i64, command: &str, args: &str) -> Vec<Reply> {
        match command {
            "start" => text(
                "This is the official RPA bot scraping statements from bank accounts.\n\
                 Bot is alive. Use /help for commands.",
            ),
            "help" => text(HELP),
            "run" => self.cmd_run(args),
            "stop" => self.cmd_stop(args),
            "stopall" => self.cmd_stopall(),
            "running" => self.cmd_running(),
            "active" => self.cmd_active(),
            "balance" => self.cmd_balance(args),
            "balances" => self.cmd_balances(),
            "status" => self.cmd_status(args),
            "list" | "aliases" => self.cmd_list(),
            "add" => self.cmd_add(args),
            "edit" => self.cmd_edit(chat_id, args),
            "file" => self.cmd_file(args),
            "alerts" => self.cmd_alerts(),
            "reset_alerts" => self.cmd_reset_alerts(args),
            other => text(format!("Unknown command: /{other}. Try /help.")),
        }
    }

    // ── /run ─────────────────────────────────────────────────────────────────

    fn cmd_run(&self, args: &str) -> Vec<Reply> {
        let (aliases, range) = match parse_run_args(args) {
            Ok(parsed) => parsed,
            Err(msg) => return text(msg),
        };
        if aliases.is_empty() {
            return text("Usage: /run <alias>… [from DD/MM/YYYY to DD/MM/YYYY]");
        }
        let mut lines = Vec::new();
        for alias in aliases {
            match self.supervisor.start_worker(&alias, range) {
                Ok(()) => lines.push(format!("{alias}: started")),
                Err(e) => lines.push(format!("{alias}: {e}")),
            }
        }
        text(lines.join("\n"))
    }

    // ── /stop, /stopall ──────────────────────────────────────────────────────

    fn cmd_stop(&self, args: &str) -> Vec<Reply> {
        let aliases: Vec<&str> = args.split_whitespace().collect();
        if aliases.is_empty() {
            return text("Usage: /stop <alias>…");
        }
        let lines: Vec<String> = aliases
            .iter()
            .map(|alias| format!("{alias}: {}", outcome_text(self.supervisor.stop_worker(alias))))
            .collect();
        text(lines.join("\n"))
    }

    fn cmd_stopall(&self) -> Vec<Reply> {
        let outcomes = self.supervisor.stop_all();
        if outcomes.is_empty() {
            return text("No workers running.");
        }
        let lines: Vec<String> = outcomes
            .into_iter()
            .map(|(alias, outcome)| format!("{alias}: {}", outcome_text(outcome)))
            .collect();
        text(lines.join("\n"))
    }

    // ── listings ─────────────────────────────────────────────────────────────

    fn cmd_running(&self) -> Vec<Reply> {
        let running = self.supervisor.list_running();
        if running.is_empty() {
            return text("No workers running.");
        }
        let lines: Vec<String> = running
            .into_iter()
            .map(|(alias, bank)| format!("{alias} ({bank})"))
            .collect();
        text(format!("Running workers:\n{}", lines.join("\n")))
    }

    fn cmd_active(&self) -> Vec<Reply> {
        let entries = self.supervisor.list_active();
        if entries.is_empty() {
            return text("No workers running.");
        }
        let lines: Vec<String> = entries
            .into_iter()
            .map(|e| {
                let when = e
                    .last_upload_at
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".into());
                let marker = if e.stale { " (stale)" } else { "" };
                format!("{}: last upload {when}{marker}", e.alias)
            })
            .collect();
        text(format!("Active workers:\n{}", lines.join("\n")))
    }

    fn cmd_balance(&self, args: &str) -> Vec<Reply> {
        let aliases: Vec<String> = args.split_whitespace().map(str::to_string).collect();
        let rows = self.supervisor.query_balance(&aliases);
        if rows.is_empty() {
            return text("No workers running.");
        }
        let lines: Vec<String> = rows
            .into_iter()
            .map(|(alias, value)| format!("{alias}: {value}"))
            .collect();
        text(lines.join("\n"))
    }

    fn cmd_balances(&self) -> Vec<Reply> {
        let rows = self.supervisor.query_balance(&[]);
        if rows.is_empty() {
            return text("No workers running.");
        }
        let lines: Vec<String> = rows
            .into_iter()
            .map(|(alias, value)| {
                let against = parse_balance_amount(&value)
                    .map(|amount| match self.monitor.ladder().next_rung(amount) {
                        Some(rung) => format!("next threshold \u{20b9}{}", rung.amount),
                        None => "above the entire ladder".into(),
                    })
                    .unwrap_or_else(|| "unparsed".into());
                format!("{alias}: {value} ({against})")
            })
            .collect();
        text(format!("Balances vs thresholds:\n{}", lines.join("\n")))
    }

    fn cmd_status(&self, args: &str) -> Vec<Reply> {
        let alias = args.trim();
        if alias.is_empty() {
            return text("Usage: /status <alias>");
        }
        match self.supervisor.status_screenshot(alias, "status requested") {
            Ok(()) => text(format!("{alias}: capturing all tabs…")),
            Err(e) => text(format!("{alias}: {e}")),
        }
    }

    fn cmd_list(&self) -> Vec<Reply> {
        let creds = self.supervisor.creds().snapshot();
        if creds.is_empty() {
            return text("No credentials found in database.");
        }
        // Group by bank, account numbers masked to the last four digits.
        let mut items: Vec<(String, String, String)> = creds
            .values()
            .map(|c| {
                (
                    if c.bank_label.is_empty() { "UNKNOWN".into() } else { c.bank_label.clone() },
                    c.alias.clone(),
                    c.masked_account(),
                )
            })
            .collect();
        items.sort_by(|a, b| (a.0.to_lowercase(), a.1.to_lowercase())
            .cmp(&(b.0.to_lowercase(), b.1.to_lowercase())));

        let mut out = String::from("Credentials list:\n");
        let mut current_bank: Option<&str> = None;
        for (i, (bank, alias, masked)) in items.iter().enumerate() {
            if current_bank != Some(bank.as_str()) {
                out.push_str(&format!("\n<b><u>{bank}</u></b>\n"));
                current_bank = Some(bank.as_str());
            }
            out.push_str(&format!(
                "{:02}. <b>{alias}</b>  |  <code>{masked}</code>\n",
                i + 1
            ));
        }
        text(out)
    }

    // ── /add ─────────────────────────────────────────────────────────────────

    fn cmd_add(&self, args: &str) -> Vec<Reply> {
        let parts: Vec<&str> = args
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let alias = parts.first().copied().unwrap_or("").to_lowercase();
        let five_field_bank = alias.ends_with("_iobcorp");

        if five_field_bank && parts.len() != 5 {
            return text(
                "This bank needs the 5-field form:\n\
                 /add alias,login_id,user_id,password,account_number\n\
                 Example: /add test_iobcorp,loginid,userid,pass,1234567890",
            );
        }
        if !five_field_bank && !matches!(parts.len(), 4 | 5) {
            return text(
                "Invalid format.\n\
                 Use 4 fields for TMB/IOB/KGB/IDBI/IDFC/CANARA:\n\
                 /add alias,username,password,account_number\n\
                 or 5 fields for IOB corporate:\n\
                 /add alias,login_id,user_id,password,account_number",
            );
        }

        let cred = if parts.len() == 4 {
            Credential::from_fields(parts[0], "", "", parts[1], parts[2], parts[3])
        } else {
            Credential::from_fields(parts[0], parts[1], parts[2], "", parts[3], parts[4])
        };

        match self.supervisor.add_credential(&cred) {
            Ok(()) => text(format!("Added alias <code>{}</code>.", cred.alias)),
            Err(AutobotError::DuplicateAccountNumber {
                account,
                existing_alias,
            }) => text(format!(
                "Account number <code>{account}</code> is already linked to alias \
                 <code>{existing_alias}</code>.\nUse /edit {existing_alias} to update it instead."
            )),
            Err(e) => text(format!("{e}")),
        }
    }

    // ── /edit (interactive) ──────────────────────────────────────────────────

    fn cmd_edit(&self, chat_id: i64, args: &str) -> Vec<Reply> {
        let alias = args.trim().to_string();
        if alias.is_empty() {
            return text("Usage: /edit <alias>");
        }
        if self.supervisor.creds().get(&alias).is_none() {
            return text(format!("Unknown alias \"{alias}\"."));
        }
        self.pending_edit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(chat_id, PendingEdit { alias: alias.clone(), field: None });
        text(format!(
            "What do you want to change for {alias}? \
             Reply with one of: login, user, password, account"
        ))
    }

    fn continue_edit(&self, chat_id: i64, input: &str) -> Vec<Reply> {
        let mut pending = self.pending_edit.lock().unwrap_or_else(|p| p.into_inner());
        let Some(state) = pending.get_mut(&chat_id) else {
            return Vec::new();
        };

        match state.field {
            None => match CredentialField::from_key(&input.to_lowercase()) {
                Some(field) => {
                    state.field = Some(field);
                    let prompt = if field == CredentialField::Password {
                        "Enter new password:".to_string()
                    } else {
                        format!("Enter new {}:", field.label())
                    };
                    text(prompt)
                }
                None => text("Pick one of: login, user, password, account"),
            },
            Some(field) => {
                let alias = state.alias.clone();
                pending.remove(&chat_id);
                drop(pending);
                self.apply_edit(&alias, field, input)
            }
        }
    }

    fn apply_edit(&self, alias: &str, field: CredentialField, value: &str) -> Vec<Reply> {
        match self.supervisor.edit_credential(alias, field, value) {
            Ok(live_patched) => {
                let shown = match field {
                    CredentialField::Password => "Password updated.".to_string(),
                    CredentialField::AccountNumber => {
                        let value = value.trim();
                        let masked = if value.len() > 4 {
                            format!("{}{}", "•".repeat(value.len() - 4), &value[value.len() - 4..])
                        } else {
                            value.to_string()
                        };
                        format!("{} -> {masked}", field.label())
                    }
                    _ => format!("{} -> {}", field.label(), value.trim()),
                };
                let tail = if live_patched {
                    "\nChange will fully apply on next login; the current session keeps running."
                } else {
                    ""
                };
                text(format!("{alias}: {shown}{tail}"))
            }
            Err(AutobotError::DuplicateAccountNumber {
                account: _,
                existing_alias,
            }) => text(format!(
                "Account number already used by alias '{existing_alias}'.\n\
                 Use /edit {existing_alias} to change that alias, or pick another number."
            )),
            Err(e) => text(format!("{e}")),
        }
    }

    // ── /file ────────────────────────────────────────────────────────────────

    fn cmd_file(&self, args: &str) -> Vec<Reply> {
        let alias = args.trim();
        if alias.is_empty() {
            return text("Usage: /file <alias>");
        }
        let dir = self.download_root.join(alias);
        match newest_statement_file(&dir) {
            Some(path) => vec![Reply::Document {
                caption: format!("[{alias}] latest statement"),
                path,
            }],
            None => text(format!("No statement files downloaded for {alias} yet.")),
        }
    }

    // ── alerts ───────────────────────────────────────────────────────────────

    fn cmd_alerts(&self) -> Vec<Reply> {
        let s = self.monitor.status();
        text(format!(
            "Balance monitor:\n\
             alert groups: {}\n\
             check interval: {}s\n\
             repeat interval: {}s\n\
             aliases with active alerts: {}\n\
             total triggered thresholds: {}",
            s.alert_groups,
            s.check_interval.as_secs(),
            s.repeat_interval.as_secs(),
            s.monitored_aliases,
            s.total_triggered,
        ))
    }

    fn cmd_reset_alerts(&self, args: &str) -> Vec<Reply> {
        match args.trim() {
            "" => text("Usage: /reset_alerts <alias|all>"),
            "all" => {
                let count = self.monitor.reset_all();
                text(format!("Cleared alert state for {count} alias(es)."))
            }
            alias => {
                if self.monitor.reset_alias(alias) {
                    text(format!("Cleared alert state for {alias}."))
                } else {
                    text(format!("No alert state for {alias}."))
                }
            }
        }
    }

    // ── plain text ───────────────────────────────────────────────────────────

    fn plain_text(&self, chat_id: i64, input: &str) -> Vec<Reply> {
        // An in-flight /edit dialogue eats the message first.
        let in_edit = self
            .pending_edit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&chat_id);
        if in_edit {
            return self.continue_edit(chat_id, input);
        }

        let applied = self.supervisor.registry().broadcast_code(input);
        if applied.is_empty() {
            Vec::new()
        } else {
            text(format!("Applied to {}", applied.join(", ")))
        }
    }
}

const HELP: &str = "Available commands:\n\
/run <alias>… [from DD/MM/YYYY to DD/MM/YYYY]\n\
/stop <alias>…  /stopall\n\
/running  /active\n\
/balance [alias…]  /balances\n\
/status <alias>  /file <alias>\n\
/list  /add <fields>  /edit <alias>\n\
/alerts  /reset_alerts <alias|all>\n\
Send a 6-digit code for OTP, or a 4-8 character code for CAPTCHA.";

fn text(msg: impl Into<String>) -> Vec<Reply> {
    vec![Reply::Text(msg.into())]
}

fn outcome_text(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Stopped => "stopped",
        StopOutcome::ForceRemoved => "did not stop in time; removed from registry",
        StopOutcome::NotRunning => "not running",
    }
}

/// Split `/run` arguments into aliases and an optional date range.
fn parse_run_args(args: &str) -> Result<(Vec<String>, Option<DateWindow>), String> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let from_pos = tokens.iter().position(|t| t.eq_ignore_ascii_case("from"));

    let Some(pos) = from_pos else {
        return Ok((tokens.into_iter().map(str::to_string).collect(), None));
    };

    // Expect: from <DD/MM/YYYY> to <DD/MM/YYYY>
    if tokens.len() != pos + 4 || !tokens[pos + 2].eq_ignore_ascii_case("to") {
        return Err("Date range must be: from DD/MM/YYYY to DD/MM/YYYY".into());
    }
    let window = datewindow::parse_override(tokens[pos + 1], tokens[pos + 3])
        .ok_or_else(|| "Could not parse the date range (DD/MM/YYYY, from <= to)".to_string())?;
    let aliases = tokens[..pos].iter().map(|t| t.to_string()).collect();
    Ok((aliases, Some(window)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_banks::PortalAdapters;
    use autobot_browser::fake::FakeFactory;
    use autobot_creds::CredStore;
    use autobot_messenger::memory::MemoryTransport;
    use autobot_messenger::Messenger;
    use autobot_monitor::{MonitorConfig, ThresholdLadder};
    use autobot_sink::StatementSink;
    use autobot_supervisor::{Deps, Registry};
    use autobot_worker::WorkerTuning;
    use chrono::NaiveDate;

    fn rig() -> (CommandCtx, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("creds.csv");
        std::fs::write(
            &csv,
            "alias,login_id,user_id,username,password,account_number\n\
             acme_tmb,,,user1,pw1,1234567890\n\
             beta_iob,,,user2,pw2,2222\n",
        )
        .unwrap();

        let messenger = Messenger::spawn(Box::new(MemoryTransport::new()), 1, false);
        let registry = Arc::new(Registry::new());
        let supervisor = Arc::new(Supervisor::new(Deps {
            creds: Arc::new(CredStore::open(&csv).unwrap()),
            registry: Arc::clone(&registry),
            messenger: messenger.clone(),
            solver: None,
            sessions: Arc::new(FakeFactory::new(dir.path().join("downloads"))),
            adapters: Arc::new(PortalAdapters),
            sink: StatementSink::new("https://autobank.payatom.in/bankupload.php"),
            tuning: WorkerTuning::default(),
        }));
        let monitor = BalanceMonitor::new(
            MonitorConfig::new(180, vec![]),
            ThresholdLadder::default(),
            messenger,
            Box::new(|| Vec::new()),
        );
        let ctx = CommandCtx::new(supervisor, monitor, dir.path().join("downloads"));
        (ctx, dir)
    }

    fn one_text(replies: Vec<Reply>) -> String {
        assert_eq!(replies.len(), 1, "expected one reply, got {replies:?}");
        match replies.into_iter().next().unwrap() {
            Reply::Text(t) => t,
            other => panic!("expected text reply, got {other:?}"),
        }
    }

    #[test]
    fn run_args_parse_with_and_without_range() {
        let (aliases, range) = parse_run_args("a_tmb b_kgb").unwrap();
        assert_eq!(aliases, vec!["a_tmb", "b_kgb"]);
        assert!(range.is_none());

        let (aliases, range) =
            parse_run_args("g_kgb from 01/02/2024 to 03/02/2024").unwrap();
        assert_eq!(aliases, vec!["g_kgb"]);
        let range = range.unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());

        assert!(parse_run_args("x from 01/02/2024").is_err());
        assert!(parse_run_args("x from 03/02/2024 to 01/02/2024").is_err());
    }

    #[test]
    fn run_reports_unknown_aliases_per_line() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(1, "/run ghost_alias"));
        assert!(reply.contains("ghost_alias"));
        assert!(reply.contains("unknown alias"));
    }

    #[test]
    fn list_masks_account_numbers() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(1, "/list"));
        assert!(reply.contains("acme_tmb"));
        assert!(reply.contains("***7890"));
        assert!(!reply.contains("1234567890"));
        assert!(reply.contains("TMB"));
    }

    #[test]
    fn add_enforces_field_counts_and_duplicates() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(1, "/add only,three,fields"));
        assert!(reply.contains("Invalid format"));

        // Duplicate account number names the colliding alias.
        let reply = one_text(ctx.handle(1, "/add bar_tmb,u,p,1234567890"));
        assert!(reply.contains("acme_tmb"));

        let reply = one_text(ctx.handle(1, "/add corp_iobcorp,u,p,999"));
        assert!(reply.contains("5-field"));

        let reply = one_text(ctx.handle(1, "/add fresh_kgb,u,p,5555"));
        assert!(reply.contains("Added alias"));
    }

    #[test]
    fn edit_flow_walks_field_then_value() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(9, "/edit acme_tmb"));
        assert!(reply.contains("What do you want to change"));

        let reply = one_text(ctx.handle(9, "password"));
        assert!(reply.contains("Enter new password"));

        let reply = one_text(ctx.handle(9, "s3cret"));
        assert!(reply.contains("Password updated"));
        assert!(!reply.contains("s3cret"), "passwords are never echoed");

        // The dialogue is finished; further text falls through to broadcast.
        assert!(ctx.handle(9, "some ordinary chatter").is_empty());
    }

    #[test]
    fn edit_unknown_alias_bounces() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(9, "/edit nope"));
        assert!(reply.contains("Unknown alias"));
    }

    #[test]
    fn balance_and_running_report_idle_state() {
        let (ctx, _dir) = rig();
        assert_eq!(one_text(ctx.handle(1, "/running")), "No workers running.");
        let reply = one_text(ctx.handle(1, "/balance acme_tmb"));
        assert!(reply.contains("not running"));
    }

    #[test]
    fn file_without_downloads_explains() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(1, "/file acme_tmb"));
        assert!(reply.contains("No statement files"));
    }

    #[test]
    fn reset_alerts_requires_target() {
        let (ctx, _dir) = rig();
        let reply = one_text(ctx.handle(1, "/reset_alerts"));
        assert!(reply.contains("Usage"));
        let reply = one_text(ctx.handle(1, "/reset_alerts all"));
        assert!(reply.contains("0 alias(es)"));
    }
}
