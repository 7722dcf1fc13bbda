//! The capability contract every bank adapter implements, plus the context
//! the runtime hands into each adapter call.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;

use autobot_browser::BrowserSession;
use autobot_captcha::{SolveOptions, TwoCaptcha};
use autobot_core::datewindow::DateWindow;
use autobot_core::{AutobotError, BankKind, Credential};
use autobot_messenger::{EventKind, Messenger};

use crate::runtime::WorkerTuning;
use crate::shared::{StopSignal, WorkerShared};

// ── BankAdapter ──────────────────────────────────────────────────────────────

/// One bank's portal navigation. Implementations hold no retry logic and
/// never catch their own errors; the runtime's retry wrapper is the only
/// layer that decides whether to try again.
pub trait BankAdapter: Send {
    fn kind(&self) -> BankKind;

    /// Drive the portal to a signed-in state. Afterwards `fetch_statement`
    /// must work without re-entering the login flow.
    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError>;

    /// Navigate to the statement page, apply the date window, trigger the
    /// download and return the newly-appeared file.
    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError>;

    /// Portal-rendered available balance for the exact account number.
    /// Best-effort: may return an empty string on layout changes.
    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError>;

    /// Report a mid-session invalidation; checked before each steady-loop
    /// iteration.
    fn detect_logged_out(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<bool, AutobotError> {
        Ok(false)
    }
}

/// Builds the adapter for a bank. The production implementation lives in the
/// banks crate; test suites inject scripted adapters through this seam.
pub trait AdapterFactory: Send + Sync {
    fn make(&self, kind: BankKind) -> Box<dyn BankAdapter>;
}

// ── AdapterCtx ───────────────────────────────────────────────────────────────

/// Everything an adapter may touch during one call: its own session, the
/// credential snapshot for this login cycle, the CAPTCHA solver, the event
/// stream and the code inboxes.
pub struct AdapterCtx<'a> {
    pub alias: &'a str,
    pub cred: Credential,
    pub session: &'a mut dyn BrowserSession,
    pub solver: Option<&'a TwoCaptcha>,
    pub messenger: &'a Messenger,
    pub shared: &'a WorkerShared,
    pub stop: &'a StopSignal,
    pub tuning: &'a WorkerTuning,
    /// Supervisor-supplied statement range; honored by the KGB adapter only.
    pub date_override: Option<DateWindow>,
}

impl AdapterCtx<'_> {
    pub fn info(&self, msg: impl AsRef<str>) {
        self.messenger.send_event(
            format!("[{}] {}", self.alias, msg.as_ref()),
            EventKind::Info,
        );
    }

    pub fn event(&self, msg: impl AsRef<str>, kind: EventKind) {
        self.messenger
            .send_event(format!("[{}] {}", self.alias, msg.as_ref()), kind);
    }

    /// Publish a freshly read balance and log it.
    pub fn publish_balance(&self, text: &str) {
        if !text.trim().is_empty() {
            self.shared.set_balance(text.trim());
            self.info(format!("Balance: {}", text.trim()));
        }
    }

    /// Statement window for this bank: the supervisor override when present,
    /// otherwise the cutover rule against the local clock.
    pub fn date_window(&self, cutover_hour: u32) -> DateWindow {
        match self.date_override {
            Some(window) => window,
            None => DateWindow::for_moment(Local::now().naive_local(), cutover_hour),
        }
    }

    /// Solve a CAPTCHA image: auto-solve when a key is configured, otherwise
    /// ship the image to the chat and wait for a manually supplied code.
    /// Returns `(text, ticket)`; manual codes carry no ticket.
    pub fn solve_captcha(
        &mut self,
        image: &[u8],
        opts: SolveOptions,
    ) -> Result<(String, Option<String>), AutobotError> {
        if let Some(solver) = self.solver.filter(|s| s.enabled()) {
            self.info("Solving CAPTCHA via 2Captcha…");
            if let Some((text, ticket)) = solver.solve(image, opts)? {
                self.info(format!("Auto-solved: {text}"));
                return Ok((text, Some(ticket)));
            }
        }
        self.messenger.send_photo(
            image.to_vec(),
            format!("[{}] Please solve this CAPTCHA", self.alias),
            EventKind::Captcha,
        );
        let code = self.wait_for_captcha()?;
        Ok((code, None))
    }

    /// Wait for a chat-supplied CAPTCHA code (180 s bound by default).
    pub fn wait_for_captcha(&self) -> Result<String, AutobotError> {
        self.wait_inbox(
            self.tuning.captcha_wait,
            || self.shared.take_captcha(),
            "CAPTCHA",
        )
    }

    /// Wait for a chat-supplied OTP (300 s bound by default).
    pub fn wait_for_otp(&self) -> Result<String, AutobotError> {
        self.event("Waiting for 6-digit OTP (send it in the chat)…", EventKind::Otp);
        self.wait_inbox(self.tuning.otp_wait, || self.shared.take_otp(), "OTP")
    }

    fn wait_inbox(
        &self,
        bound: std::time::Duration,
        mut take: impl FnMut() -> Option<String>,
        what: &str,
    ) -> Result<String, AutobotError> {
        let deadline = Instant::now() + bound;
        loop {
            if self.stop.is_set() {
                return Err(AutobotError::Cancelled);
            }
            if let Some(code) = take() {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                return Err(AutobotError::Timeout(format!(
                    "{what} not supplied within {}s",
                    bound.as_secs()
                )));
            }
            std::thread::sleep(self.tuning.inbox_poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_browser::fake::FakeSession;
    use autobot_messenger::memory::MemoryTransport;
    use std::time::Duration;

    fn tuning() -> WorkerTuning {
        WorkerTuning {
            captcha_wait: Duration::from_millis(50),
            otp_wait: Duration::from_millis(50),
            inbox_poll: Duration::from_millis(5),
            ..WorkerTuning::default()
        }
    }

    #[test]
    fn inbox_waits_time_out_with_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession::new(dir.path());
        let cred = Credential::from_fields("a_tmb", "", "", "u", "p", "1");
        let shared = WorkerShared::new("a_tmb", cred.clone());
        let stop = StopSignal::new();
        let messenger = Messenger::spawn(Box::new(MemoryTransport::new()), 1, false);
        let tuning = tuning();

        let ctx = AdapterCtx {
            alias: "a_tmb",
            cred,
            session: &mut session,
            solver: None,
            messenger: &messenger,
            shared: &shared,
            stop: &stop,
            tuning: &tuning,
            date_override: None,
        };

        assert!(matches!(
            ctx.wait_for_captcha(),
            Err(AutobotError::Timeout(_))
        ));

        // A queued code is consumed exactly once.
        shared.offer_captcha("AB12");
        assert_eq!(ctx.wait_for_captcha().unwrap(), "AB12");
        assert!(matches!(
            ctx.wait_for_captcha(),
            Err(AutobotError::Timeout(_))
        ));

        // The stop signal beats the deadline.
        stop.set();
        assert!(matches!(ctx.wait_for_otp(), Err(AutobotError::Cancelled)));
        messenger.close();
    }
}
