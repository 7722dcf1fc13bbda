//! Cross-thread worker surfaces: the stop signal and the public slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use autobot_core::{Credential, CredentialField, WorkerState};

// ── StopSignal ───────────────────────────────────────────────────────────────

/// One-shot cancellation token. Every sleep and wait loop in a worker checks
/// it at least once per second.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep in ≤1 s slices. Returns `false` when interrupted by the signal.
    pub fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.is_set() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(Duration::from_secs(1)));
        }
        !self.is_set()
    }
}

// ── WorkerShared ─────────────────────────────────────────────────────────────

/// The publicly observable slice of one worker. Written by the worker's own
/// thread (except the inboxes, the credential hot-swap and the screenshot
/// request, which arrive from the chat side); every field sits behind its own
/// mutex.
pub struct WorkerShared {
    alias: String,
    state: Mutex<WorkerState>,
    cred: Mutex<Credential>,
    last_balance: Mutex<Option<String>>,
    last_upload_at: Mutex<Option<DateTime<Local>>>,
    captcha_inbox: Mutex<Option<String>>,
    otp_inbox: Mutex<Option<String>>,
    screenshot_request: Mutex<Option<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl WorkerShared {
    pub fn new(alias: impl Into<String>, cred: Credential) -> Self {
        WorkerShared {
            alias: alias.into(),
            state: Mutex::new(WorkerState::Init),
            cred: Mutex::new(cred),
            last_balance: Mutex::new(None),
            last_upload_at: Mutex::new(None),
            captcha_inbox: Mutex::new(None),
            otp_inbox: Mutex::new(None),
            screenshot_request: Mutex::new(None),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn state(&self) -> WorkerState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: WorkerState) {
        *lock(&self.state) = state;
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    // ── credential hot-swap ──────────────────────────────────────────────────

    /// Value copy for the next login cycle.
    pub fn cred_snapshot(&self) -> Credential {
        lock(&self.cred).clone()
    }

    /// Patch one field in place; takes full effect on the next login.
    pub fn patch_credential(&self, field: CredentialField, value: &str) {
        field.apply(&mut lock(&self.cred), value);
    }

    // ── balance / upload bookkeeping ─────────────────────────────────────────

    pub fn last_balance(&self) -> Option<String> {
        lock(&self.last_balance).clone()
    }

    pub fn set_balance(&self, text: impl Into<String>) {
        *lock(&self.last_balance) = Some(text.into());
    }

    pub fn last_upload_at(&self) -> Option<DateTime<Local>> {
        *lock(&self.last_upload_at)
    }

    pub fn mark_uploaded(&self, at: DateTime<Local>) {
        *lock(&self.last_upload_at) = Some(at);
    }

    // ── inboxes ──────────────────────────────────────────────────────────────

    pub fn offer_captcha(&self, code: impl Into<String>) {
        *lock(&self.captcha_inbox) = Some(code.into());
    }

    /// Consume the latest CAPTCHA text, if any (each code is used once).
    pub fn take_captcha(&self) -> Option<String> {
        lock(&self.captcha_inbox).take()
    }

    pub fn offer_otp(&self, code: impl Into<String>) {
        *lock(&self.otp_inbox) = Some(code.into());
    }

    pub fn take_otp(&self) -> Option<String> {
        lock(&self.otp_inbox).take()
    }

    /// Drop any queued codes; part of the tab-reset protocol.
    pub fn clear_inboxes(&self) {
        *lock(&self.captcha_inbox) = None;
        *lock(&self.otp_inbox) = None;
    }

    // ── status screenshots ───────────────────────────────────────────────────

    /// Ask the worker thread to capture all tabs at its next checkpoint
    /// (sessions are not shareable across threads, so the worker itself must
    /// take the shot).
    pub fn request_screenshot(&self, reason: impl Into<String>) {
        *lock(&self.screenshot_request) = Some(reason.into());
    }

    pub fn take_screenshot_request(&self) -> Option<String> {
        lock(&self.screenshot_request).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> WorkerShared {
        let cred = Credential::from_fields("a_tmb", "", "", "u", "p", "111");
        WorkerShared::new("a_tmb", cred)
    }

    #[test]
    fn inbox_codes_are_consumed_once() {
        let s = shared();
        s.offer_captcha("AB12");
        s.offer_captcha("AB12");
        assert_eq!(s.take_captcha().as_deref(), Some("AB12"));
        assert_eq!(s.take_captcha(), None);
    }

    #[test]
    fn patch_credential_changes_the_next_snapshot() {
        let s = shared();
        s.patch_credential(CredentialField::Password, "rotated");
        assert_eq!(s.cred_snapshot().password, "rotated");
    }

    #[test]
    fn stop_signal_interrupts_sleep() {
        let sig = StopSignal::new();
        sig.set();
        let started = Instant::now();
        assert!(!sig.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
