//! autobot-messenger — outbound chat notifications.
//!
//! Thread-safe from any worker: the `Messenger` handle pushes onto a channel
//! and a single dedicated delivery thread owns the `ChatTransport`. Critical
//! events ship immediately; the rest batch into one summary message per
//! minute. Each send retries three times with a one-second backoff; a
//! consecutive-failure counter escalates in the log at five.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{error, info, warn};

use autobot_core::constants::{
    MESSENGER_FLUSH_INTERVAL, MESSENGER_MAX_CONSECUTIVE_ERRORS, MESSENGER_RETRY_SLEEP,
    MESSENGER_SEND_RETRIES,
};
use autobot_core::AutobotError;

pub mod memory;

// ── Event kinds ──────────────────────────────────────────────────────────────

/// Classification of an outbound event; critical kinds bypass batching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Error,
    Start,
    Stop,
    Captcha,
    Otp,
    UploadOk,
}

impl EventKind {
    pub fn is_critical(&self) -> bool {
        !matches!(self, EventKind::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "INFO",
            EventKind::Error => "ERROR",
            EventKind::Start => "START",
            EventKind::Stop => "STOP",
            EventKind::Captcha => "CAPTCHA",
            EventKind::Otp => "OTP",
            EventKind::UploadOk => "UPLOAD_OK",
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// The chat backend. Synchronous and object-safe; the delivery thread is the
/// only caller.
pub trait ChatTransport: Send {
    fn send_text(&self, chat_id: i64, text: &str) -> Result<(), AutobotError>;
    fn send_photo(&self, chat_id: i64, png: &[u8], caption: &str) -> Result<(), AutobotError>;
    fn send_document(&self, chat_id: i64, path: &Path, caption: &str)
        -> Result<(), AutobotError>;
}

// ── Messenger ────────────────────────────────────────────────────────────────

enum Outbound {
    Event {
        text: String,
        kind: EventKind,
    },
    Photo {
        png: Vec<u8>,
        caption: String,
        kind: EventKind,
    },
    Document {
        path: PathBuf,
        caption: String,
    },
    Direct {
        chat_id: i64,
        text: String,
        done: Sender<Result<(), AutobotError>>,
    },
    SetDebug(bool),
    Close,
}

/// Cloneable handle; all clones feed the same delivery thread.
#[derive(Clone)]
pub struct Messenger {
    tx: Sender<Outbound>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Messenger {
    /// Start the delivery thread. `debug` forces immediate delivery of
    /// everything (no batching, no photo dropping).
    pub fn spawn(transport: Box<dyn ChatTransport>, chat_id: i64, debug: bool) -> Self {
        let (tx, rx) = mpsc::channel::<Outbound>();
        let handle = std::thread::Builder::new()
            .name("messenger".into())
            .spawn(move || {
                let mut task = DeliveryTask {
                    transport,
                    chat_id,
                    debug,
                    buffer: Vec::new(),
                    consecutive_errors: 0,
                };
                let mut next_flush = Instant::now() + MESSENGER_FLUSH_INTERVAL;
                loop {
                    let timeout = next_flush.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(timeout) {
                        Ok(Outbound::Close) => break,
                        Ok(msg) => task.handle(msg),
                        Err(RecvTimeoutError::Timeout) => {
                            task.flush();
                            next_flush = Instant::now() + MESSENGER_FLUSH_INTERVAL;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                task.flush();
                info!("messenger closed");
            })
            .expect("spawn messenger thread");

        Messenger {
            tx,
            join: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queue an event. Critical kinds (and everything in debug mode) deliver
    /// immediately; the rest join the next minute's summary.
    pub fn send_event(&self, text: impl Into<String>, kind: EventKind) {
        let _ = self.tx.send(Outbound::Event {
            text: text.into(),
            kind,
        });
    }

    /// Queue a photo. Non-critical photos are dropped in production mode by
    /// design: only ERROR shots and CAPTCHA images reach the chat.
    pub fn send_photo(&self, png: Vec<u8>, caption: impl Into<String>, kind: EventKind) {
        let _ = self.tx.send(Outbound::Photo {
            png,
            caption: caption.into(),
            kind,
        });
    }

    pub fn send_document(&self, path: impl Into<PathBuf>, caption: impl Into<String>) {
        let _ = self.tx.send(Outbound::Document {
            path: path.into(),
            caption: caption.into(),
        });
    }

    /// Deliver text to an explicit chat and report the outcome. The balance
    /// monitor uses this so a failed alert can be retried next tick.
    pub fn send_direct(&self, chat_id: i64, text: impl Into<String>) -> Result<(), AutobotError> {
        let (done_tx, done_rx) = mpsc::channel();
        self.tx
            .send(Outbound::Direct {
                chat_id,
                text: text.into(),
                done: done_tx,
            })
            .map_err(|_| AutobotError::Other("messenger closed".into()))?;
        done_rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .map_err(|_| AutobotError::Other("messenger did not answer".into()))?
    }

    pub fn set_debug(&self, on: bool) {
        let _ = self.tx.send(Outbound::SetDebug(on));
    }

    /// Final flush, then join the delivery thread.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
        if let Some(handle) = self.join.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

// ── Delivery thread ──────────────────────────────────────────────────────────

struct DeliveryTask {
    transport: Box<dyn ChatTransport>,
    chat_id: i64,
    debug: bool,
    buffer: Vec<String>,
    consecutive_errors: u32,
}

impl DeliveryTask {
    fn handle(&mut self, msg: Outbound) {
        match msg {
            Outbound::Event { text, kind } => {
                if self.debug || kind.is_critical() {
                    self.deliver_text(self.chat_id, &text);
                } else {
                    self.buffer.push(text);
                }
            }
            Outbound::Photo { png, caption, kind } => {
                if self.debug || kind.is_critical() {
                    self.deliver(|t, chat| t.send_photo(chat, &png, &caption));
                } else {
                    // Dropped by design in production mode.
                    tracing::debug!("skipping non-critical photo in production mode");
                }
            }
            Outbound::Document { path, caption } => {
                self.deliver(|t, chat| t.send_document(chat, &path, &caption));
            }
            Outbound::Direct {
                chat_id,
                text,
                done,
            } => {
                let result = self.deliver_text(chat_id, &text);
                let _ = done.send(result);
            }
            Outbound::SetDebug(on) => {
                self.debug = on;
                info!(debug = on, "messenger debug mode changed");
            }
            Outbound::Close => unreachable!("handled by the loop"),
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = format!("Summary (last 1 min):\n{}", self.buffer.join("\n"));
        self.buffer.clear();
        self.deliver_text(self.chat_id, &text);
    }

    fn deliver_text(&mut self, chat_id: i64, text: &str) -> Result<(), AutobotError> {
        let text = text.to_string();
        self.deliver(move |t, _| t.send_text(chat_id, &text))
    }

    /// Run one send with the retry/backoff discipline and keep the
    /// consecutive-failure counter.
    fn deliver<F>(&mut self, send: F) -> Result<(), AutobotError>
    where
        F: Fn(&dyn ChatTransport, i64) -> Result<(), AutobotError>,
    {
        let mut last_err = None;
        for attempt in 1..=MESSENGER_SEND_RETRIES {
            match send(self.transport.as_ref(), self.chat_id) {
                Ok(()) => {
                    self.consecutive_errors = 0;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "chat send failed");
                    last_err = Some(e);
                    if attempt < MESSENGER_SEND_RETRIES {
                        std::thread::sleep(MESSENGER_RETRY_SLEEP);
                    }
                }
            }
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= MESSENGER_MAX_CONSECUTIVE_ERRORS {
            error!(
                consecutive = self.consecutive_errors,
                "too many consecutive chat errors; messages may not be delivered"
            );
        }
        Err(last_err.unwrap_or_else(|| AutobotError::Other("send failed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;

    #[test]
    fn critical_events_deliver_immediately() {
        let transport = MemoryTransport::new();
        let log = transport.log();
        let messenger = Messenger::spawn(Box::new(transport), 7, false);

        messenger.send_event("[a_tmb] boom", EventKind::Error);
        messenger.send_event("[a_tmb] ticking along", EventKind::Info);
        messenger.close();

        let entries = log.lock().unwrap();
        // ERROR first, then the close-time flush carrying the INFO line.
        assert!(entries[0].contains("boom"));
        assert!(entries.iter().any(|e| e.contains("Summary (last 1 min)")));
        assert!(entries.iter().any(|e| e.contains("ticking along")));
    }

    #[test]
    fn non_critical_photo_dropped_in_production() {
        let transport = MemoryTransport::new();
        let log = transport.log();
        let messenger = Messenger::spawn(Box::new(transport), 7, false);

        messenger.send_photo(vec![1], "routine shot", EventKind::Info);
        messenger.send_photo(vec![2], "login failure", EventKind::Error);
        messenger.close();

        let entries = log.lock().unwrap();
        assert_eq!(entries.iter().filter(|e| e.starts_with("photo:")).count(), 1);
        assert!(entries[0].contains("login failure"));
    }

    #[test]
    fn direct_send_reports_failure_after_retries() {
        let transport = MemoryTransport::new();
        transport.fail_next(MESSENGER_SEND_RETRIES as usize);
        let log = transport.log();
        let messenger = Messenger::spawn(Box::new(transport), 7, false);

        assert!(messenger.send_direct(42, "alert!").is_err());
        // All three attempts hit the transport.
        assert_eq!(log.lock().unwrap().len(), 0);
        // And a later send succeeds once the transport recovers.
        assert!(messenger.send_direct(42, "alert again").is_ok());
        messenger.close();
    }
}
