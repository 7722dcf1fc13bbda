//! Supervisor/registry integration tests: start/stop semantics, registry
//! invariants, credential hot-swap and the code broadcast rule. Workers run
//! a parked adapter (logged in, then waiting mid-download) so the lifecycle
//! is fully deterministic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autobot_browser::fake::FakeFactory;
use autobot_core::{AutobotError, BankKind, Credential, CredentialField, WorkerState};
use autobot_creds::CredStore;
use autobot_messenger::memory::MemoryTransport;
use autobot_messenger::Messenger;
use autobot_sink::StatementSink;
use autobot_supervisor::{Deps, Registry, StopOutcome, Supervisor};
use autobot_worker::{AdapterCtx, AdapterFactory, BankAdapter, WorkerTuning};

// ── Parked adapter ───────────────────────────────────────────────────────────

/// Logs in instantly, then parks in `fetch_statement` until the stop signal
/// fires: a worker permanently "mid-download".
struct ParkedAdapter {
    kind: BankKind,
}

impl BankAdapter for ParkedAdapter {
    fn kind(&self) -> BankKind {
        self.kind
    }

    fn login(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        Ok(())
    }

    fn fetch_statement(
        &mut self,
        ctx: &mut AdapterCtx<'_>,
    ) -> Result<PathBuf, AutobotError> {
        while !ctx.stop.is_set() {
            std::thread::sleep(Duration::from_millis(5));
        }
        Err(AutobotError::Cancelled)
    }

    fn read_balance(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        Ok(String::new())
    }
}

struct ParkedAdapters;

impl AdapterFactory for ParkedAdapters {
    fn make(&self, kind: BankKind) -> Box<dyn BankAdapter> {
        Box::new(ParkedAdapter { kind })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Rig {
    supervisor: Supervisor,
    factory: Arc<FakeFactory>,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("creds.csv");
    std::fs::write(
        &csv,
        "alias,login_id,user_id,username,password,account_number\n\
         acme_tmb,,,user1,pw1,1111\n\
         beta_iob,,,user2,pw2,2222\n\
         gamma_kgb,,,user3,pw3,3333\n\
         odd_hdfc,,,user4,pw4,4444\n",
    )
    .unwrap();

    let factory = Arc::new(FakeFactory::new(dir.path().join("downloads")));
    let tuning = WorkerTuning {
        max_retries: 2,
        retry_sleep: Duration::from_millis(5),
        max_outer_failures: 5,
        steady_interval: Duration::from_millis(10),
        upload_attempts: 2,
        upload_retry_sleep: Duration::from_millis(5),
        captcha_wait: Duration::from_millis(50),
        otp_wait: Duration::from_millis(50),
        inbox_poll: Duration::from_millis(5),
        download_timeout: Duration::from_millis(100),
        download_stable: Duration::from_millis(1),
    };

    let deps = Deps {
        creds: Arc::new(CredStore::open(&csv).unwrap()),
        registry: Arc::new(Registry::new()),
        messenger: Messenger::spawn(Box::new(MemoryTransport::new()), 1, false),
        solver: None,
        sessions: factory.clone(),
        adapters: Arc::new(ParkedAdapters),
        sink: StatementSink::new("https://autobank.payatom.in/bankupload.php"),
        tuning,
    };

    Rig {
        supervisor: Supervisor::new(deps),
        factory,
        _dir: dir,
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let end = Instant::now() + Duration::from_secs(5);
    while Instant::now() < end {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

fn start_and_wait(rig: &Rig, alias: &str) {
    rig.supervisor.start_worker(alias, None).unwrap();
    wait_until("worker steady", || {
        rig.supervisor
            .registry()
            .get(alias)
            .map(|h| h.shared().state() == WorkerState::Steady)
            .unwrap_or(false)
    });
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn start_errors_are_typed() {
    let rig = rig();
    assert!(matches!(
        rig.supervisor.start_worker("ghost", None),
        Err(AutobotError::UnknownAlias(_))
    ));
    assert!(matches!(
        rig.supervisor.start_worker("odd_hdfc", None),
        Err(AutobotError::UnsupportedBank(_))
    ));
}

#[test]
fn at_most_one_worker_per_alias() {
    let rig = rig();
    start_and_wait(&rig, "acme_tmb");
    assert!(matches!(
        rig.supervisor.start_worker("acme_tmb", None),
        Err(AutobotError::AliasAlreadyRunning(_))
    ));
    assert_eq!(rig.supervisor.registry().len(), 1);
    rig.supervisor.stop_all();
}

#[test]
fn stop_then_restart_produces_a_fresh_worker() {
    let rig = rig();
    start_and_wait(&rig, "acme_tmb");

    assert_eq!(rig.supervisor.stop_worker("acme_tmb"), StopOutcome::Stopped);
    assert!(rig.supervisor.registry().get("acme_tmb").is_none());

    // Restart is legal and opens a brand-new session.
    start_and_wait(&rig, "acme_tmb");
    assert_eq!(rig.factory.open_count(), 2);
    rig.supervisor.stop_all();
}

#[test]
fn stopping_an_idle_alias_is_informational() {
    let rig = rig();
    assert_eq!(
        rig.supervisor.stop_worker("acme_tmb"),
        StopOutcome::NotRunning
    );
}

#[test]
fn stop_all_empties_the_registry() {
    let rig = rig();
    for alias in ["acme_tmb", "beta_iob", "gamma_kgb"] {
        start_and_wait(&rig, alias);
    }
    assert_eq!(rig.supervisor.list_running().len(), 3);

    let outcomes = rig.supervisor.stop_all();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == StopOutcome::Stopped));
    assert!(rig.supervisor.registry().is_empty());
}

#[test]
fn edit_credential_patches_store_and_live_worker() {
    let rig = rig();
    start_and_wait(&rig, "acme_tmb");

    let patched = rig
        .supervisor
        .edit_credential("acme_tmb", CredentialField::Password, "rotated")
        .unwrap();
    assert!(patched);
    assert_eq!(
        rig.supervisor.creds().get("acme_tmb").unwrap().password,
        "rotated"
    );
    let handle = rig.supervisor.registry().get("acme_tmb").unwrap();
    assert_eq!(handle.shared().cred_snapshot().password, "rotated");

    // Duplicate account numbers still bounce with the colliding alias.
    let err = rig
        .supervisor
        .edit_credential("acme_tmb", CredentialField::AccountNumber, "2222")
        .unwrap_err();
    match err {
        AutobotError::DuplicateAccountNumber { existing_alias, .. } => {
            assert_eq!(existing_alias, "beta_iob")
        }
        other => panic!("unexpected error: {other}"),
    }
    rig.supervisor.stop_all();
}

#[test]
fn add_credential_rejects_duplicates_and_accepts_fresh_rows() {
    let rig = rig();
    let dup = Credential::from_fields("fresh_tmb", "", "", "u", "p", "1111");
    assert!(matches!(
        rig.supervisor.add_credential(&dup),
        Err(AutobotError::DuplicateAccountNumber { .. })
    ));
    let fresh = Credential::from_fields("fresh_tmb", "", "", "u", "p", "5555");
    rig.supervisor.add_credential(&fresh).unwrap();
    assert!(rig.supervisor.creds().get("fresh_tmb").is_some());
}

#[test]
fn query_balance_reports_not_running_and_live_values() {
    let rig = rig();
    start_and_wait(&rig, "acme_tmb");
    rig.supervisor
        .registry()
        .get("acme_tmb")
        .unwrap()
        .shared()
        .set_balance("₹12,345.67");

    let rows = rig.supervisor.query_balance(&[
        "acme_tmb".to_string(),
        "beta_iob".to_string(),
    ]);
    assert_eq!(rows[0].1, "₹12,345.67");
    assert_eq!(rows[1].1, "not running");
    rig.supervisor.stop_all();
}

#[test]
fn status_screenshot_requires_a_live_worker() {
    let rig = rig();
    assert!(matches!(
        rig.supervisor.status_screenshot("acme_tmb", "status"),
        Err(AutobotError::NotRunning(_))
    ));
    start_and_wait(&rig, "acme_tmb");
    rig.supervisor
        .status_screenshot("acme_tmb", "status")
        .unwrap();
    rig.supervisor.stop_all();
}

#[test]
fn broadcast_feeds_only_live_workers_and_codes_consume_once() {
    let rig = rig();
    start_and_wait(&rig, "acme_tmb");
    let registry = rig.supervisor.registry();

    let applied = registry.broadcast_code("482913");
    assert!(applied.contains(&"acme_tmb: OTP".to_string()));
    assert!(applied.contains(&"acme_tmb: CAPTCHA".to_string()));

    let shared = registry.get("acme_tmb").unwrap();
    assert_eq!(shared.shared().take_otp().as_deref(), Some("482913"));
    assert_eq!(shared.shared().take_otp(), None);

    // A compact alphanumeric code goes to the CAPTCHA inbox, uppercased.
    registry.broadcast_code("ab 12");
    assert_eq!(shared.shared().take_captcha().as_deref(), Some("AB12"));

    // Chit-chat is ignored.
    assert!(registry.broadcast_code("hello there operators").is_empty());

    rig.supervisor.stop_all();
}
