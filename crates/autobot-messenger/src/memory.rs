//! In-memory `ChatTransport` used by the workspace test suites.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use autobot_core::AutobotError;

use crate::ChatTransport;

/// Records every delivered message; can be told to fail the next N sends.
pub struct MemoryTransport {
    log: Arc<Mutex<Vec<String>>>,
    fail_remaining: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared view of everything delivered so far.
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    /// Make the next `n` sends fail with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn gate(&self) -> Result<(), AutobotError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AutobotError::Other("injected transport failure".into()));
        }
        Ok(())
    }

    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTransport for MemoryTransport {
    fn send_text(&self, chat_id: i64, text: &str) -> Result<(), AutobotError> {
        self.gate()?;
        self.record(format!("text:{chat_id}:{text}"));
        Ok(())
    }

    fn send_photo(&self, chat_id: i64, _png: &[u8], caption: &str) -> Result<(), AutobotError> {
        self.gate()?;
        self.record(format!("photo:{chat_id}:{caption}"));
        Ok(())
    }

    fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<(), AutobotError> {
        self.gate()?;
        self.record(format!("doc:{chat_id}:{}:{caption}", path.display()));
        Ok(())
    }
}
