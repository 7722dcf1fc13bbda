//! The alias → worker map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use autobot_core::AutobotError;
use autobot_worker::WorkerHandle;

/// Read-only view of one worker, as handed to the balance monitor and the
/// list commands.
#[derive(Clone, Debug)]
pub struct WorkerView {
    pub alias: String,
    pub bank_label: String,
    pub account_number: String,
    pub last_balance: Option<String>,
    pub last_upload_at: Option<DateTime<Local>>,
    pub alive: bool,
}

/// Exclusive owner of all live workers, guarded by a single mutex.
/// At most one worker per alias at any instant.
#[derive(Default)]
pub struct Registry {
    workers: Mutex<HashMap<String, Arc<WorkerHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<WorkerHandle>>> {
        self.workers.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert a freshly spawned worker. An existing *alive* entry wins and
    /// the insert is refused; a dead leftover entry is displaced.
    pub fn insert(&self, handle: Arc<WorkerHandle>) -> Result<(), AutobotError> {
        let mut map = self.lock();
        if let Some(existing) = map.get(handle.alias()) {
            if existing.is_alive() {
                return Err(AutobotError::AliasAlreadyRunning(handle.alias().into()));
            }
        }
        map.insert(handle.alias().to_string(), handle);
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Option<Arc<WorkerHandle>> {
        self.lock().get(alias).cloned()
    }

    pub fn remove(&self, alias: &str) -> Option<Arc<WorkerHandle>> {
        self.lock().remove(alias)
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lock().keys().cloned().collect();
        out.sort();
        out
    }

    /// Consistent snapshot of every entry.
    pub fn snapshot(&self) -> Vec<Arc<WorkerHandle>> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.alias().cmp(b.alias()));
        entries
    }

    /// Snapshot filtered to alive workers.
    pub fn alive(&self) -> Vec<Arc<WorkerHandle>> {
        self.snapshot()
            .into_iter()
            .filter(|h| h.is_alive())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monitor-facing views of the alive workers.
    pub fn views(&self) -> Vec<WorkerView> {
        self.alive()
            .iter()
            .map(|h| {
                let shared = h.shared();
                let cred = shared.cred_snapshot();
                WorkerView {
                    alias: h.alias().to_string(),
                    bank_label: cred.bank_label,
                    account_number: cred.account_number,
                    last_balance: shared.last_balance(),
                    last_upload_at: shared.last_upload_at(),
                    alive: true,
                }
            })
            .collect()
    }

    /// Broadcast a chat-supplied code to every live worker's inboxes.
    /// Six digits feed both the OTP and CAPTCHA slots; compact 4-8
    /// alphanumerics feed CAPTCHA only (uppercased). Deliberately
    /// unaddressed: every live worker receives the code and only the ones
    /// currently waiting consume it (preserved from the original system,
    /// cross-talk and all).
    pub fn broadcast_code(&self, text: &str) -> Vec<String> {
        let trimmed: String = text.split_whitespace().collect();
        let mut applied = Vec::new();

        let is_otp = trimmed.len() == 6 && trimmed.chars().all(|c| c.is_ascii_digit());
        let is_captcha = (4..=8).contains(&trimmed.len())
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
        if !is_otp && !is_captcha {
            return applied;
        }

        for handle in self.alive() {
            if is_otp {
                handle.shared().offer_otp(trimmed.clone());
                applied.push(format!("{}: OTP", handle.alias()));
            }
            handle.shared().offer_captcha(trimmed.to_uppercase());
            applied.push(format!("{}: CAPTCHA", handle.alias()));
        }
        applied
    }
}
