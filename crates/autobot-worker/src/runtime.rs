//! The worker lifecycle: spawn, state machine, retry wrapper, tab reset,
//! upload sub-protocol, cancellation and liveness.

use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use autobot_browser::{BrowserSession, SessionInterrupt};
use autobot_captcha::TwoCaptcha;
use autobot_core::constants;
use autobot_core::datewindow::DateWindow;
use autobot_core::{AutobotError, Credential, WorkerState};
use autobot_messenger::{EventKind, Messenger};
use autobot_sink::Uploader;

use crate::adapter::{AdapterCtx, BankAdapter};
use crate::shared::{StopSignal, WorkerShared};

// ── Tuning ───────────────────────────────────────────────────────────────────

/// Every interval and bound the runtime honors. Defaults are the production
/// constants; the test suites shrink them to milliseconds.
#[derive(Clone, Debug)]
pub struct WorkerTuning {
    pub max_retries: u32,
    pub retry_sleep: Duration,
    pub max_outer_failures: u32,
    pub steady_interval: Duration,
    pub upload_attempts: u32,
    pub upload_retry_sleep: Duration,
    pub captcha_wait: Duration,
    pub otp_wait: Duration,
    pub inbox_poll: Duration,
    pub download_timeout: Duration,
    pub download_stable: Duration,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        WorkerTuning {
            max_retries: constants::MAX_RETRIES,
            retry_sleep: constants::RETRY_SLEEP,
            max_outer_failures: constants::MAX_OUTER_FAILURES,
            steady_interval: constants::STEADY_INTERVAL,
            upload_attempts: constants::UPLOAD_ATTEMPTS,
            upload_retry_sleep: constants::UPLOAD_RETRY_SLEEP,
            captcha_wait: constants::CAPTCHA_MANUAL_WAIT,
            otp_wait: constants::OTP_WAIT,
            inbox_poll: constants::INBOX_POLL,
            download_timeout: constants::DOWNLOAD_TIMEOUT,
            download_stable: constants::DOWNLOAD_SIZE_STABLE,
        }
    }
}

/// Per-spawn configuration.
#[derive(Clone, Debug, Default)]
pub struct WorkerConfig {
    pub tuning: WorkerTuning,
    pub date_override: Option<DateWindow>,
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Supervisor-side view of one running worker.
pub struct WorkerHandle {
    alias: String,
    shared: Arc<WorkerShared>,
    stop: StopSignal,
    interrupt: Box<dyn SessionInterrupt>,
    done_rx: Mutex<Receiver<()>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Fire the stop signal and tear the browser session down, interrupting
    /// any in-flight driver call.
    pub fn request_stop(&self) {
        self.stop.set();
        self.interrupt.quit();
    }

    /// Wait for the worker thread to finish. Returns `false` when the
    /// deadline passed first (the caller force-removes the entry anyway).
    pub fn wait_done(&self, deadline: Duration) -> bool {
        let rx = self.done_rx.lock().unwrap_or_else(|p| p.into_inner());
        match rx.recv_timeout(deadline) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) =
                    self.join.lock().unwrap_or_else(|p| p.into_inner()).take()
                {
                    let _ = handle.join();
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }
}

// ── Spawn ────────────────────────────────────────────────────────────────────

/// Launch one worker on its own named OS thread and return its handle.
#[allow(clippy::too_many_arguments)]
pub fn spawn_worker(
    alias: String,
    cred: Credential,
    adapter: Box<dyn BankAdapter>,
    session: Box<dyn BrowserSession>,
    solver: Option<Arc<TwoCaptcha>>,
    messenger: Messenger,
    sink: Box<dyn Uploader>,
    config: WorkerConfig,
) -> Result<WorkerHandle, AutobotError> {
    let shared = Arc::new(WorkerShared::new(alias.clone(), cred));
    let stop = StopSignal::new();
    let interrupt = session.interrupt();
    let (done_tx, done_rx) = mpsc::channel();

    let mut runtime = WorkerRuntime {
        alias: alias.clone(),
        adapter,
        session,
        solver,
        messenger,
        sink,
        shared: Arc::clone(&shared),
        stop: stop.clone(),
        tuning: config.tuning,
        date_override: config.date_override,
    };

    let thread = std::thread::Builder::new()
        .name(format!("worker-{alias}"))
        .spawn(move || {
            runtime.run();
            let _ = done_tx.send(());
        })
        .map_err(|e| AutobotError::Other(format!("spawning worker thread: {e}")))?;

    Ok(WorkerHandle {
        alias,
        shared,
        stop,
        interrupt,
        done_rx: Mutex::new(done_rx),
        join: Mutex::new(Some(thread)),
    })
}

// ── Runtime ──────────────────────────────────────────────────────────────────

struct WorkerRuntime {
    alias: String,
    adapter: Box<dyn BankAdapter>,
    session: Box<dyn BrowserSession>,
    solver: Option<Arc<TwoCaptcha>>,
    messenger: Messenger,
    sink: Box<dyn Uploader>,
    shared: Arc<WorkerShared>,
    stop: StopSignal,
    tuning: WorkerTuning,
    date_override: Option<DateWindow>,
}

enum CycleOutcome {
    Completed,
    LoggedOut,
    Failed(AutobotError),
}

impl WorkerRuntime {
    fn run(&mut self) {
        let bank = self.adapter.kind().name();
        info!(alias = %self.alias, bank, "worker starting");
        self.emit(format!("Starting {bank} automation"), EventKind::Info);

        let mut outer_failures: u32 = 0;

        'outer: while !self.stop.is_set() {
            // ── Login phase ──────────────────────────────────────────────────
            self.shared.set_state(WorkerState::LoggingIn);
            match self.run_op("Login", |adapter, ctx| adapter.login(ctx)) {
                Ok(()) => {
                    self.shared.set_state(WorkerState::Steady);
                    self.emit("Logged in", EventKind::Start);
                }
                Err(e) if e.is_cancelled() => break 'outer,
                Err(AutobotError::LoggedOut) => {
                    if self.tab_reset().is_err() {
                        break 'outer;
                    }
                    continue 'outer;
                }
                Err(e) => {
                    outer_failures += 1;
                    warn!(alias = %self.alias, error = %e, outer_failures, "login cycle failed");
                    if outer_failures > self.tuning.max_outer_failures {
                        self.emit("Too many failures. Stopping.", EventKind::Error);
                        break 'outer;
                    }
                    if self.tab_reset().is_err() {
                        break 'outer;
                    }
                    continue 'outer;
                }
            }

            // ── Steady phase ─────────────────────────────────────────────────
            while !self.stop.is_set() {
                self.serve_screenshot_request();

                match self.check_logged_out() {
                    Ok(false) => {}
                    Ok(true) | Err(AutobotError::LoggedOut) => {
                        self.emit("Session logged out; re-logging in", EventKind::Info);
                        if self.tab_reset().is_err() {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    Err(_) => {}
                }

                match self.steady_cycle() {
                    CycleOutcome::Completed => {
                        outer_failures = 0;
                        if !self.stop.sleep(self.tuning.steady_interval) {
                            break 'outer;
                        }
                    }
                    CycleOutcome::LoggedOut => {
                        self.emit("Session logged out; re-logging in", EventKind::Info);
                        if self.tab_reset().is_err() {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    CycleOutcome::Failed(e) => {
                        if e.is_cancelled() {
                            break 'outer;
                        }
                        outer_failures += 1;
                        warn!(
                            alias = %self.alias,
                            error = %e,
                            outer_failures,
                            "statement cycle failed"
                        );
                        if outer_failures > self.tuning.max_outer_failures {
                            self.emit("Too many failures. Stopping.", EventKind::Error);
                            break 'outer;
                        }
                        if self.tab_reset().is_err() {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                }
            }
        }

        // ── Teardown ─────────────────────────────────────────────────────────
        self.shared.set_state(WorkerState::Stopped);
        if let Err(e) = self.session.quit() {
            debug!(alias = %self.alias, error = %e, "session quit failed");
        }
        self.emit("Worker stopped", EventKind::Stop);
        info!(alias = %self.alias, "worker stopped");
    }

    /// One fetch → upload → read-balance pass.
    fn steady_cycle(&mut self) -> CycleOutcome {
        let file = match self.run_op("Statement fetch", |adapter, ctx| {
            adapter.fetch_statement(ctx)
        }) {
            Ok(path) => path,
            Err(AutobotError::LoggedOut) => return CycleOutcome::LoggedOut,
            Err(e) => return CycleOutcome::Failed(e),
        };

        if let Err(e) = self.upload_statement(&file) {
            if matches!(e, AutobotError::LoggedOut) {
                return CycleOutcome::LoggedOut;
            }
            return CycleOutcome::Failed(e);
        }

        // Balance is best-effort: exhausted retries must not burn the cycle.
        match self.run_op("Balance read", |adapter, ctx| adapter.read_balance(ctx)) {
            Ok(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.shared.set_balance(&text);
                    self.emit(format!("Balance: {text}"), EventKind::Info);
                }
            }
            Err(e) if e.is_cancelled() => return CycleOutcome::Failed(e),
            Err(AutobotError::LoggedOut) => return CycleOutcome::LoggedOut,
            Err(_) => self.emit("Balance read skipped", EventKind::Info),
        }

        CycleOutcome::Completed
    }

    // ── Retry wrapper ────────────────────────────────────────────────────────

    /// Run one adapter operation with the shared retry discipline: up to
    /// `max_retries` attempts, 5 s apart, a full-tabs screenshot and a
    /// structured ERROR per failed attempt. `LoggedOut` and cancellation
    /// bubble immediately; a rejected CAPTCHA reports its ticket and
    /// tab-resets before the next attempt.
    fn run_op<T>(
        &mut self,
        label: &str,
        mut op: impl FnMut(&mut dyn BankAdapter, &mut AdapterCtx<'_>) -> Result<T, AutobotError>,
    ) -> Result<T, AutobotError> {
        let mut attempt = 0;
        loop {
            if self.stop.is_set() {
                return Err(AutobotError::Cancelled);
            }
            attempt += 1;

            let result = {
                let cred = self.shared.cred_snapshot();
                let mut ctx = AdapterCtx {
                    alias: &self.alias,
                    cred,
                    session: self.session.as_mut(),
                    solver: self.solver.as_deref(),
                    messenger: &self.messenger,
                    shared: self.shared.as_ref(),
                    stop: &self.stop,
                    tuning: &self.tuning,
                    date_override: self.date_override,
                };
                op(self.adapter.as_mut(), &mut ctx)
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(AutobotError::LoggedOut) => return Err(AutobotError::LoggedOut),
                Err(e) => e,
            };

            self.emit(
                format!(
                    "Oops! There seems to be an issue.\n\
                     Context: {label} (attempt {attempt}/{max})\n\
                     Error: {err}",
                    max = self.tuning.max_retries
                ),
                EventKind::Error,
            );
            self.screenshot_all_tabs(&format!("{label} failure (attempt {attempt})"));

            if let AutobotError::CaptchaWrong { ticket } = &err {
                if let (Some(ticket), Some(solver)) = (ticket, self.solver.as_deref()) {
                    solver.report_bad(ticket);
                }
                let _ = self.tab_reset();
            }

            if attempt >= self.tuning.max_retries || self.stop.is_set() {
                return Err(err);
            }
            if !self.stop.sleep(self.tuning.retry_sleep) {
                return Err(AutobotError::Cancelled);
            }
        }
    }

    // ── Tab reset protocol ───────────────────────────────────────────────────

    /// Open a fresh blank tab, close every previously-known tab, keep the new
    /// one, clear both inboxes. A driver that cannot produce a tab stops the
    /// worker.
    fn tab_reset(&mut self) -> Result<(), AutobotError> {
        self.shared.set_state(WorkerState::Recovering);
        let old = self.session.window_handles().unwrap_or_default();

        let fresh = match self.session.open_tab() {
            Ok(handle) => handle,
            Err(e) => {
                self.emit(
                    "Tab reset failed; stopping worker",
                    EventKind::Error,
                );
                warn!(alias = %self.alias, error = %e, "tab reset failed");
                return Err(AutobotError::TabUnavailable);
            }
        };
        for handle in old {
            if handle != fresh && self.session.switch_window(&handle).is_ok() {
                let _ = self.session.close_window();
            }
        }
        if self.session.switch_window(&fresh).is_err() {
            return Err(AutobotError::TabUnavailable);
        }

        self.shared.clear_inboxes();
        self.shared.set_state(WorkerState::LoggingIn);
        debug!(alias = %self.alias, "tab reset complete");
        Ok(())
    }

    fn check_logged_out(&mut self) -> Result<bool, AutobotError> {
        let cred = self.shared.cred_snapshot();
        let mut ctx = AdapterCtx {
            alias: &self.alias,
            cred,
            session: self.session.as_mut(),
            solver: self.solver.as_deref(),
            messenger: &self.messenger,
            shared: self.shared.as_ref(),
            stop: &self.stop,
            tuning: &self.tuning,
            date_override: self.date_override,
        };
        self.adapter.detect_logged_out(&mut ctx)
    }

    // ── Upload sub-protocol ──────────────────────────────────────────────────

    /// Ship a fetched statement through the sink in a dedicated second tab:
    /// up to 5 attempts, 2 s apart; on success close everything except the
    /// bank tab and stamp `last_upload_at`.
    fn upload_statement(&mut self, file: &Path) -> Result<(), AutobotError> {
        let kind = self.adapter.kind();
        let cred = self.shared.cred_snapshot();
        let original = self.session.current_window()?;
        let upload_tab = self.session.open_tab()?;

        let mut last_reason = String::new();
        for attempt in 1..=self.tuning.upload_attempts {
            if self.stop.is_set() {
                self.close_extra_tabs(&original);
                return Err(AutobotError::Cancelled);
            }
            if let Err(e) = self.session.switch_window(&upload_tab) {
                last_reason = e.to_string();
                break;
            }
            match self.sink.upload(
                self.session.as_mut(),
                kind.sink_label(),
                &cred.account_number,
                file,
            ) {
                Ok(()) => {
                    self.close_extra_tabs(&original);
                    self.shared.mark_uploaded(Local::now());
                    self.emit(
                        format!(
                            "AutoBank upload succeeded (attempt {attempt}/{})",
                            self.tuning.upload_attempts
                        ),
                        EventKind::UploadOk,
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_reason = e.to_string();
                    self.emit(
                        format!(
                            "AutoBank upload failed (attempt {attempt}/{}): {e}",
                            self.tuning.upload_attempts
                        ),
                        EventKind::Error,
                    );
                    self.screenshot_all_tabs("AutoBank upload failed");
                    if attempt < self.tuning.upload_attempts {
                        self.stop.sleep(self.tuning.upload_retry_sleep);
                    }
                }
            }
        }

        self.close_extra_tabs(&original);
        Err(AutobotError::UploadFailed {
            attempts: self.tuning.upload_attempts,
            reason: last_reason,
        })
    }

    /// Close every tab except `keep` and focus it again. Best-effort.
    fn close_extra_tabs(&mut self, keep: &str) {
        if let Ok(handles) = self.session.window_handles() {
            for handle in handles {
                if handle != keep && self.session.switch_window(&handle).is_ok() {
                    let _ = self.session.close_window();
                }
            }
        }
        let _ = self.session.switch_window(keep);
    }

    // ── Observability ────────────────────────────────────────────────────────

    /// Capture every open tab and ship the shots as ERROR photos.
    fn screenshot_all_tabs(&mut self, reason: &str) {
        let original = self.session.current_window().ok();
        let handles = self.session.window_handles().unwrap_or_default();
        for handle in handles {
            if self.session.switch_window(&handle).is_err() {
                continue;
            }
            let Ok(png) = self.session.screenshot() else {
                continue;
            };
            let title = self
                .session
                .title()
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "unknown tab".into());
            let mut caption = format!("[{}] {title}", self.alias);
            if !reason.is_empty() {
                caption.push_str(&format!(" - {reason}"));
            }
            self.messenger.send_photo(png, caption, EventKind::Error);
        }
        if let Some(original) = original {
            let _ = self.session.switch_window(&original);
        }
    }

    fn serve_screenshot_request(&mut self) {
        if let Some(reason) = self.shared.take_screenshot_request() {
            self.screenshot_all_tabs(&reason);
        }
    }

    fn emit(&self, msg: impl AsRef<str>, kind: EventKind) {
        self.messenger
            .send_event(format!("[{}] {}", self.alias, msg.as_ref()), kind);
    }
}
