//! Lifecycle tests for the worker runtime, driven by a scripted adapter and
//! the in-memory browser session. All intervals are shrunk to milliseconds.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use autobot_browser::fake::FakeSession;
use autobot_browser::By;
use autobot_core::{AutobotError, BankKind, Credential, WorkerState};
use autobot_messenger::memory::MemoryTransport;
use autobot_messenger::Messenger;
use autobot_sink::{StatementSink, Uploader};
use autobot_worker::{spawn_worker, AdapterCtx, BankAdapter, WorkerConfig, WorkerHandle, WorkerTuning};

// ── Scripted adapter ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Step {
    Ok,
    CaptchaWrong,
    Fail,
}

#[derive(Default)]
struct Script {
    login_calls: AtomicU32,
    fetch_calls: AtomicU32,
    login_plan: Mutex<VecDeque<Step>>,
    fetch_plan: Mutex<VecDeque<Step>>,
    logged_out_once: AtomicBool,
}

impl Script {
    fn plan_login(&self, steps: &[Step]) {
        *self.login_plan.lock().unwrap() = steps.iter().copied().collect();
    }

    fn plan_fetch(&self, steps: &[Step]) {
        *self.fetch_plan.lock().unwrap() = steps.iter().copied().collect();
    }

    fn next(plan: &Mutex<VecDeque<Step>>) -> Step {
        plan.lock().unwrap().pop_front().unwrap_or(Step::Ok)
    }
}

struct ScriptedAdapter {
    script: Arc<Script>,
}

impl BankAdapter for ScriptedAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Tmb
    }

    fn login(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        let n = self.script.login_calls.fetch_add(1, Ordering::SeqCst);
        match Script::next(&self.script.login_plan) {
            Step::Ok => Ok(()),
            Step::CaptchaWrong => Err(AutobotError::CaptchaWrong {
                ticket: Some(format!("ticket-{n}")),
            }),
            Step::Fail => Err(AutobotError::Portal("login step broke".into())),
        }
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        let n = self.script.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match Script::next(&self.script.fetch_plan) {
            Step::Ok => {
                let path = ctx.session.download_dir().join(format!("stmt-{n}.xls"));
                std::fs::write(&path, b"statement bytes")?;
                Ok(path)
            }
            Step::CaptchaWrong => unreachable!("fetch never raises CaptchaWrong"),
            Step::Fail => Err(AutobotError::Timeout("statement page hung".into())),
        }
    }

    fn read_balance(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        Ok("₹12,345.67".into())
    }

    fn detect_logged_out(&mut self, _ctx: &mut AdapterCtx<'_>) -> Result<bool, AutobotError> {
        Ok(self.script.logged_out_once.swap(false, Ordering::SeqCst))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Rig {
    handle: WorkerHandle,
    script: Arc<Script>,
    log: Arc<Mutex<Vec<String>>>,
    messenger: Messenger,
    _dir: tempfile::TempDir,
}

fn tuned() -> WorkerTuning {
    WorkerTuning {
        max_retries: 3,
        retry_sleep: Duration::from_millis(5),
        max_outer_failures: 5,
        steady_interval: Duration::from_millis(20),
        upload_attempts: 5,
        upload_retry_sleep: Duration::from_millis(5),
        captcha_wait: Duration::from_millis(100),
        otp_wait: Duration::from_millis(100),
        inbox_poll: Duration::from_millis(5),
        download_timeout: Duration::from_millis(200),
        download_stable: Duration::from_millis(1),
    }
}

fn start_rig(script: Arc<Script>, tuning: WorkerTuning, fail_open_tab: bool) -> Rig {
    let sink = Box::new(StatementSink::new(
        "https://autobank.payatom.in/bankupload.php",
    ));
    start_rig_with_uploader(script, tuning, fail_open_tab, sink)
}

fn start_rig_with_uploader(
    script: Arc<Script>,
    tuning: WorkerTuning,
    fail_open_tab: bool,
    uploader: Box<dyn Uploader>,
) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let session = FakeSession::new(dir.path());
    {
        let state = session.state();
        let mut st = state.lock().unwrap();
        st.fail_open_tab = fail_open_tab;
        // The statement sink's portal, already healthy.
        st.install(&By::id("sidebar"), "");
        st.install(&By::id("drop-zone"), "");
        st.install(&By::id("bank"), "");
        st.install(
            &By::xpath("//select[@id='bank']/option[normalize-space(text())='TMB']"),
            "TMB",
        );
        st.install(&By::id("account_number"), "");
        st.install(&By::id("file_input"), "");
        st.page_source = "Upload successful".into();
    }

    let transport = MemoryTransport::new();
    let log = transport.log();
    let messenger = Messenger::spawn(Box::new(transport), 7, false);

    let cred = Credential::from_fields("acme_tmb", "", "", "user", "pw", "1234567890");
    let handle = spawn_worker(
        "acme_tmb".into(),
        cred,
        Box::new(ScriptedAdapter {
            script: Arc::clone(&script),
        }),
        Box::new(session),
        None,
        messenger.clone(),
        uploader,
        WorkerConfig {
            tuning,
            date_override: None,
        },
    )
    .unwrap();

    Rig {
        handle,
        script,
        log,
        messenger,
        _dir: dir,
    }
}

fn wait_until(what: &str, deadline: Duration, mut cond: impl FnMut() -> bool) {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

fn stop_and_join(rig: &Rig) {
    rig.handle.request_stop();
    assert!(rig.handle.wait_done(Duration::from_secs(5)));
    assert_eq!(rig.handle.shared().state(), WorkerState::Stopped);
    rig.messenger.close();
}

fn log_lines(rig: &Rig, needle: &str) -> usize {
    rig.log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.contains(needle))
        .count()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn happy_path_reaches_steady_and_uploads_monotonically() {
    let rig = start_rig(Arc::new(Script::default()), tuned(), false);

    wait_until("first upload", Duration::from_secs(5), || {
        rig.handle.shared().last_upload_at().is_some()
    });
    assert_eq!(rig.handle.shared().state(), WorkerState::Steady);
    let first = rig.handle.shared().last_upload_at().unwrap();
    assert_eq!(
        rig.handle.shared().last_balance().as_deref(),
        Some("₹12,345.67")
    );

    wait_until("second cycle", Duration::from_secs(5), || {
        rig.script.fetch_calls.load(Ordering::SeqCst) >= 2
            && rig.handle.shared().last_upload_at() != Some(first)
    });
    let second = rig.handle.shared().last_upload_at().unwrap();
    assert!(second >= first, "lastUploadAt must be monotone");

    stop_and_join(&rig);
    assert!(log_lines(&rig, "AutoBank upload succeeded") >= 2);
    assert_eq!(log_lines(&rig, "Too many failures"), 0);
    assert!(log_lines(&rig, "Logged in") >= 1);
    assert!(log_lines(&rig, "Worker stopped") >= 1);
}

#[test]
fn captcha_wrong_tab_resets_and_retries_login() {
    let script = Arc::new(Script::default());
    script.plan_login(&[Step::CaptchaWrong, Step::Ok]);
    let rig = start_rig(Arc::clone(&script), tuned(), false);

    wait_until("steady after captcha retry", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Steady
    });
    assert_eq!(script.login_calls.load(Ordering::SeqCst), 2);

    stop_and_join(&rig);
    // Exactly one ERROR for the failed login attempt.
    assert_eq!(log_lines(&rig, "Context: Login"), 1);
}

#[test]
fn failure_budget_exhaustion_stops_the_worker() {
    let script = Arc::new(Script::default());
    script.plan_fetch(&[Step::Fail; 40]);
    let mut tuning = tuned();
    tuning.max_retries = 1;
    tuning.max_outer_failures = 2;
    let rig = start_rig(Arc::clone(&script), tuning, false);

    wait_until("worker gives up", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Stopped
    });
    assert!(!rig.handle.is_alive());
    rig.handle.request_stop();
    rig.handle.wait_done(Duration::from_secs(5));
    rig.messenger.close();
    assert!(log_lines(&rig, "Too many failures") >= 1);
    assert!(log_lines(&rig, "Worker stopped") >= 1);
}

#[test]
fn mid_session_logout_relogs_without_burning_budget() {
    let script = Arc::new(Script::default());
    script.logged_out_once.store(true, Ordering::SeqCst);
    let rig = start_rig(Arc::clone(&script), tuned(), false);

    wait_until("re-login after logout", Duration::from_secs(5), || {
        script.login_calls.load(Ordering::SeqCst) >= 2
            && rig.handle.shared().state() == WorkerState::Steady
    });

    stop_and_join(&rig);
    assert_eq!(log_lines(&rig, "Too many failures"), 0);
    assert!(log_lines(&rig, "Session logged out") >= 1);
}

#[test]
fn tab_reset_failure_stops_the_worker() {
    let script = Arc::new(Script::default());
    script.plan_login(&[Step::Fail; 10]);
    let mut tuning = tuned();
    tuning.max_retries = 1;
    let rig = start_rig(script, tuning, true);

    wait_until("stop after tab reset failure", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Stopped
    });
    rig.messenger.close();
    assert!(log_lines(&rig, "Tab reset failed") >= 1);
}

#[test]
fn status_screenshot_request_is_served_by_the_worker_thread() {
    let rig = start_rig(Arc::new(Script::default()), tuned(), false);
    wait_until("steady", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Steady
    });

    rig.handle.shared().request_screenshot("status check");
    wait_until("screenshot delivered", Duration::from_secs(5), || {
        log_lines(&rig, "status check") >= 1
    });
    stop_and_join(&rig);
}

/// Fails every attempt and counts them.
struct RefusingUploader {
    attempts: Arc<AtomicU32>,
}

impl Uploader for RefusingUploader {
    fn upload(
        &self,
        _session: &mut dyn autobot_browser::BrowserSession,
        _bank_label: &str,
        _account_number: &str,
        _file: &std::path::Path,
    ) -> Result<(), AutobotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AutobotError::Timeout("upload portal showed no success signal".into()))
    }
}

#[test]
fn upload_retries_exactly_five_times_then_escalates() {
    let attempts = Arc::new(AtomicU32::new(0));
    let script = Arc::new(Script::default());
    let mut tuning = tuned();
    tuning.max_retries = 1;
    tuning.max_outer_failures = 0; // first escalation stops the worker
    let rig = start_rig_with_uploader(
        Arc::clone(&script),
        tuning,
        false,
        Box::new(RefusingUploader {
            attempts: Arc::clone(&attempts),
        }),
    );

    wait_until("worker stops after upload failure", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Stopped
    });
    rig.messenger.close();

    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    assert_eq!(log_lines(&rig, "upload failed (attempt 5/5)"), 1);
    assert!(rig.handle.shared().last_upload_at().is_none());
}

#[test]
fn stop_interrupts_the_steady_sleep_promptly() {
    let script = Arc::new(Script::default());
    let rig = start_rig(Arc::clone(&script), tuned(), false);
    wait_until("steady", Duration::from_secs(5), || {
        rig.handle.shared().state() == WorkerState::Steady
    });

    let started = Instant::now();
    rig.handle.request_stop();
    assert!(rig.handle.wait_done(Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(5));
    rig.messenger.close();
}
