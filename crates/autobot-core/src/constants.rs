//! ─── Autobot runtime constants ──────────────────────────────────────────────
//!
//! Every interval and bound the worker runtime, the messenger and the balance
//! monitor agree on. The worker-side values also seed `WorkerTuning`, which
//! the test suites shrink.

use std::time::Duration;

// ── Retry discipline ─────────────────────────────────────────────────────────

/// Attempts per adapter operation (Login, FetchStatement, ReadBalance).
pub const MAX_RETRIES: u32 = 3;

/// Pause between retry attempts.
pub const RETRY_SLEEP: Duration = Duration::from_secs(5);

/// Consecutive outer-loop failures before a worker gives up and stops.
pub const MAX_OUTER_FAILURES: u32 = 5;

// ── Steady loop ──────────────────────────────────────────────────────────────

/// Pause after a successful statement cycle.
pub const STEADY_INTERVAL: Duration = Duration::from_secs(60);

// ── Upload sub-protocol ──────────────────────────────────────────────────────

/// Attempts per statement upload.
pub const UPLOAD_ATTEMPTS: u32 = 5;

/// Pause between upload attempts.
pub const UPLOAD_RETRY_SLEEP: Duration = Duration::from_secs(2);

// ── External code entry ──────────────────────────────────────────────────────

/// How long a worker waits for a manually supplied CAPTCHA.
pub const CAPTCHA_MANUAL_WAIT: Duration = Duration::from_secs(180);

/// How long a worker waits for an externally supplied OTP.
pub const OTP_WAIT: Duration = Duration::from_secs(300);

/// Inbox poll cadence while waiting for CAPTCHA/OTP text.
pub const INBOX_POLL: Duration = Duration::from_millis(500);

// ── Downloads ────────────────────────────────────────────────────────────────

/// How long to wait for a statement file to land in the download directory.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// A downloaded file counts as complete once its size holds for this long.
pub const DOWNLOAD_SIZE_STABLE: Duration = Duration::from_millis(500);

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Join deadline when stopping a worker; after this it is force-removed.
pub const STOP_JOIN_DEADLINE: Duration = Duration::from_secs(5);

/// An alias counts as stale in `/active` once its last upload is older.
pub const ACTIVE_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

// ── Messenger ────────────────────────────────────────────────────────────────

/// Flush cadence for buffered non-critical events.
pub const MESSENGER_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Send attempts per outbound message.
pub const MESSENGER_SEND_RETRIES: u32 = 3;

/// Linear backoff between send attempts.
pub const MESSENGER_RETRY_SLEEP: Duration = Duration::from_secs(1);

/// Consecutive failures before the messenger escalates in the log.
pub const MESSENGER_MAX_CONSECUTIVE_ERRORS: u32 = 5;

// ── Balance monitor ──────────────────────────────────────────────────────────

/// Default seconds between balance scans.
pub const BALANCE_CHECK_INTERVAL_SECS: u64 = 180;

/// Lowest accepted scan interval; smaller configured values are clamped.
pub const BALANCE_CHECK_INTERVAL_MIN_SECS: u64 = 60;

/// Repeat interval for alerts that stay above a threshold.
pub const ALERT_REPEAT_INTERVAL: Duration = Duration::from_secs(300);
