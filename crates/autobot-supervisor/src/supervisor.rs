//! Supervisor operations over the registry and the credential store.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use autobot_browser::SessionFactory;
use autobot_captcha::TwoCaptcha;
use autobot_core::constants::{ACTIVE_STALE_AFTER, STOP_JOIN_DEADLINE};
use autobot_core::datewindow::DateWindow;
use autobot_core::{AutobotError, BankKind, Credential, CredentialField};
use autobot_creds::CredStore;
use autobot_messenger::Messenger;
use autobot_sink::StatementSink;
use autobot_worker::{spawn_worker, AdapterFactory, WorkerConfig, WorkerTuning};

use crate::registry::Registry;

/// The process-wide singletons, created at startup and passed by reference.
pub struct Deps {
    pub creds: Arc<CredStore>,
    pub registry: Arc<Registry>,
    pub messenger: Messenger,
    pub solver: Option<Arc<TwoCaptcha>>,
    pub sessions: Arc<dyn SessionFactory>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub sink: StatementSink,
    pub tuning: WorkerTuning,
}

/// What `StopWorker` observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker stopped and was removed within the join deadline.
    Stopped,
    /// Worker missed the deadline and was force-removed from the registry.
    ForceRemoved,
    /// No worker was running for the alias (informational, not an error).
    NotRunning,
}

/// One row of the `/active` listing.
#[derive(Clone, Debug)]
pub struct ActiveEntry {
    pub alias: String,
    pub last_upload_at: Option<chrono::DateTime<Local>>,
    pub stale: bool,
}

pub struct Supervisor {
    deps: Deps,
}

impl Supervisor {
    pub fn new(deps: Deps) -> Self {
        Supervisor { deps }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.deps.registry
    }

    pub fn creds(&self) -> &Arc<CredStore> {
        &self.deps.creds
    }

    // ── StartWorker ──────────────────────────────────────────────────────────

    /// Start a worker for `alias`. The optional date range is honored by the
    /// KGB adapter only; everyone else follows the cutover rule.
    pub fn start_worker(
        &self,
        alias: &str,
        date_range: Option<DateWindow>,
    ) -> Result<(), AutobotError> {
        let cred = self
            .deps
            .creds
            .get(alias)
            .ok_or_else(|| AutobotError::UnknownAlias(alias.to_string()))?;
        let kind = BankKind::resolve(&cred.bank_label)?;

        if let Some(existing) = self.deps.registry.get(alias) {
            if existing.is_alive() {
                return Err(AutobotError::AliasAlreadyRunning(alias.to_string()));
            }
            self.deps.registry.remove(alias);
        }

        let session = self.deps.sessions.open(alias)?;
        let adapter = self.deps.adapters.make(kind);
        let config = WorkerConfig {
            tuning: self.deps.tuning.clone(),
            date_override: if kind == BankKind::Kgb { date_range } else { None },
        };

        let handle = Arc::new(spawn_worker(
            alias.to_string(),
            cred,
            adapter,
            session,
            self.deps.solver.clone(),
            self.deps.messenger.clone(),
            Box::new(self.deps.sink.clone()),
            config,
        )?);

        if let Err(e) = self.deps.registry.insert(Arc::clone(&handle)) {
            // Lost the race against a concurrent start; tear ours down.
            warn!(alias, "duplicate start lost the registry race");
            handle.request_stop();
            handle.wait_done(STOP_JOIN_DEADLINE);
            return Err(e);
        }
        info!(alias, bank = kind.name(), "worker started");
        Ok(())
    }

    // ── StopWorker / StopAll ─────────────────────────────────────────────────

    /// Fire the stop signal, join with the 5 s deadline, then remove the
    /// entry no matter what.
    pub fn stop_worker(&self, alias: &str) -> StopOutcome {
        let Some(handle) = self.deps.registry.get(alias) else {
            return StopOutcome::NotRunning;
        };
        handle.request_stop();
        let joined = handle.wait_done(STOP_JOIN_DEADLINE);
        self.deps.registry.remove(alias);
        if joined {
            info!(alias, "worker stopped");
            StopOutcome::Stopped
        } else {
            warn!(alias, "worker missed join deadline; force-removed");
            StopOutcome::ForceRemoved
        }
    }

    /// Stop everything; returns per-alias outcomes.
    pub fn stop_all(&self) -> Vec<(String, StopOutcome)> {
        self.deps
            .registry
            .aliases()
            .into_iter()
            .map(|alias| {
                let outcome = self.stop_worker(&alias);
                (alias, outcome)
            })
            .collect()
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Alive aliases with their bank labels.
    pub fn list_running(&self) -> Vec<(String, String)> {
        self.deps
            .registry
            .alive()
            .iter()
            .map(|h| {
                let label = h.shared().cred_snapshot().bank_label;
                (h.alias().to_string(), label)
            })
            .collect()
    }

    /// Alive aliases with upload freshness (stale after 5 minutes).
    pub fn list_active(&self) -> Vec<ActiveEntry> {
        let now = Local::now();
        self.deps
            .registry
            .alive()
            .iter()
            .map(|h| {
                let last = h.shared().last_upload_at();
                let stale = match last {
                    Some(at) => {
                        now.signed_duration_since(at).to_std().unwrap_or_default()
                            > ACTIVE_STALE_AFTER
                    }
                    None => true,
                };
                ActiveEntry {
                    alias: h.alias().to_string(),
                    last_upload_at: last,
                    stale,
                }
            })
            .collect()
    }

    /// Last known balance per alias; aliases without a live worker report
    /// "not running". An empty filter means every live worker.
    pub fn query_balance(&self, aliases: &[String]) -> Vec<(String, String)> {
        let targets: Vec<String> = if aliases.is_empty() {
            self.deps
                .registry
                .alive()
                .iter()
                .map(|h| h.alias().to_string())
                .collect()
        } else {
            aliases.to_vec()
        };

        targets
            .into_iter()
            .map(|alias| {
                let value = match self.deps.registry.get(&alias) {
                    Some(h) if h.is_alive() => h
                        .shared()
                        .last_balance()
                        .unwrap_or_else(|| "no balance yet".into()),
                    _ => "not running".into(),
                };
                (alias, value)
            })
            .collect()
    }

    /// Ask a live worker to capture all its tabs.
    pub fn status_screenshot(&self, alias: &str, reason: &str) -> Result<(), AutobotError> {
        match self.deps.registry.get(alias) {
            Some(h) if h.is_alive() => {
                h.shared().request_screenshot(reason);
                Ok(())
            }
            _ => Err(AutobotError::NotRunning(alias.to_string())),
        }
    }

    // ── Credential operations ────────────────────────────────────────────────

    /// Update one credential field in the store and hot-patch any live
    /// worker. Returns whether a live worker was patched (the change takes
    /// full effect on its next login).
    pub fn edit_credential(
        &self,
        alias: &str,
        field: CredentialField,
        value: &str,
    ) -> Result<bool, AutobotError> {
        self.deps.creds.update_field(alias, field, value)?;

        if let Some(handle) = self.deps.registry.get(alias) {
            if handle.is_alive() {
                handle.shared().patch_credential(field, value);
                info!(alias, field = field.column(), "live credential patched");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Append a new credential row.
    pub fn add_credential(&self, cred: &Credential) -> Result<(), AutobotError> {
        self.deps.creds.append(cred)
    }
}
