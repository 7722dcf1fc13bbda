//! In-memory `BrowserSession` used by the workspace test suites.
//!
//! Pages are scripted as locator → text entries, every interaction is
//! recorded, and tab bookkeeping behaves like a real driver (including an
//! optional refusal to open new tabs, for exercising the tab-reset failure
//! path).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use autobot_core::AutobotError;

use crate::session::{BrowserSession, By, ElementHandle, SessionFactory, SessionInterrupt};

#[derive(Default)]
pub struct FakeState {
    pub elements: HashMap<String, String>,
    pub hidden: HashSet<String>,
    pub actions: Vec<String>,
    pub windows: Vec<String>,
    pub current: String,
    pub url: String,
    pub page_source: String,
    pub fail_open_tab: bool,
    pub quit: bool,
    next_tab: u32,
}

impl FakeState {
    fn new() -> Self {
        FakeState {
            windows: vec!["main".into()],
            current: "main".into(),
            ..Default::default()
        }
    }

    pub fn install(&mut self, by: &By, text: &str) {
        self.elements.insert(by.to_string(), text.to_string());
    }

    pub fn clicked(&self, needle: &str) -> bool {
        self.actions.iter().any(|a| a.contains(needle))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    download_dir: PathBuf,
}

impl FakeSession {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        FakeSession {
            state: Arc::new(Mutex::new(FakeState::new())),
            download_dir: download_dir.into(),
        }
    }

    /// Shared handle to the scripted state, for inspection mid-test.
    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn log(&self, action: String) {
        self.lock().actions.push(action);
    }
}

impl BrowserSession for FakeSession {
    fn navigate(&mut self, url: &str) -> Result<(), AutobotError> {
        let mut st = self.lock();
        st.url = url.to_string();
        st.actions.push(format!("navigate:{url}"));
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, AutobotError> {
        Ok(self.lock().url.clone())
    }

    fn title(&mut self) -> Result<String, AutobotError> {
        Ok(format!("fake:{}", self.lock().current))
    }

    fn page_source(&mut self) -> Result<String, AutobotError> {
        Ok(self.lock().page_source.clone())
    }

    fn try_find(&mut self, by: &By) -> Result<Option<ElementHandle>, AutobotError> {
        let key = by.to_string();
        Ok(self
            .lock()
            .elements
            .contains_key(&key)
            .then(|| ElementHandle(key)))
    }

    fn find_all(&mut self, by: &By) -> Result<Vec<ElementHandle>, AutobotError> {
        Ok(self.try_find(by)?.into_iter().collect())
    }

    fn click(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.log(format!("click:{}", el.0));
        Ok(())
    }

    fn js_click(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.log(format!("js_click:{}", el.0));
        Ok(())
    }

    fn type_text(&mut self, el: &ElementHandle, text: &str) -> Result<(), AutobotError> {
        self.log(format!("type:{}={}", el.0, text));
        Ok(())
    }

    fn clear(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.log(format!("clear:{}", el.0));
        Ok(())
    }

    fn text_of(&mut self, el: &ElementHandle) -> Result<String, AutobotError> {
        Ok(self.lock().elements.get(&el.0).cloned().unwrap_or_default())
    }

    fn is_displayed(&mut self, el: &ElementHandle) -> Result<bool, AutobotError> {
        Ok(!self.lock().hidden.contains(&el.0))
    }

    fn set_value(&mut self, el: &ElementHandle, value: &str) -> Result<(), AutobotError> {
        self.log(format!("set_value:{}={}", el.0, value));
        Ok(())
    }

    fn remove_readonly(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.log(format!("remove_readonly:{}", el.0));
        Ok(())
    }

    fn scroll_into_view(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.log(format!("scroll:{}", el.0));
        Ok(())
    }

    fn execute_script(&mut self, script: &str) -> Result<serde_json::Value, AutobotError> {
        self.log(format!("script:{script}"));
        Ok(serde_json::Value::Null)
    }

    fn screenshot_element(&mut self, el: &ElementHandle) -> Result<Vec<u8>, AutobotError> {
        self.log(format!("shot_el:{}", el.0));
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, AutobotError> {
        self.log("shot".into());
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    fn window_handles(&mut self) -> Result<Vec<String>, AutobotError> {
        Ok(self.lock().windows.clone())
    }

    fn current_window(&mut self) -> Result<String, AutobotError> {
        Ok(self.lock().current.clone())
    }

    fn switch_window(&mut self, handle: &str) -> Result<(), AutobotError> {
        let mut st = self.lock();
        if !st.windows.iter().any(|w| w == handle) {
            return Err(AutobotError::Driver(format!("no such window: {handle}")));
        }
        st.current = handle.to_string();
        Ok(())
    }

    fn open_tab(&mut self) -> Result<String, AutobotError> {
        let mut st = self.lock();
        if st.fail_open_tab {
            return Err(AutobotError::TabUnavailable);
        }
        st.next_tab += 1;
        let handle = format!("tab-{}", st.next_tab);
        st.windows.push(handle.clone());
        st.actions.push(format!("open_tab:{handle}"));
        Ok(handle)
    }

    fn close_window(&mut self) -> Result<(), AutobotError> {
        let mut st = self.lock();
        let current = st.current.clone();
        st.windows.retain(|w| w != &current);
        st.actions.push(format!("close:{current}"));
        if let Some(next) = st.windows.first().cloned() {
            st.current = next;
        }
        Ok(())
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn interrupt(&self) -> Box<dyn SessionInterrupt> {
        Box::new(FakeInterrupt {
            state: Arc::clone(&self.state),
        })
    }

    fn quit(&mut self) -> Result<(), AutobotError> {
        let mut st = self.lock();
        st.quit = true;
        st.windows.clear();
        st.actions.push("quit".into());
        Ok(())
    }
}

struct FakeInterrupt {
    state: Arc<Mutex<FakeState>>,
}

impl SessionInterrupt for FakeInterrupt {
    fn quit(&self) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).quit = true;
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Hands out `FakeSession`s with per-alias download directories under a test
/// root and keeps every session's state handle for later assertions.
pub struct FakeFactory {
    root: PathBuf,
    opened: Mutex<Vec<(String, Arc<Mutex<FakeState>>)>>,
    open_count: AtomicU32,
}

impl FakeFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FakeFactory {
            root: root.into(),
            opened: Mutex::new(Vec::new()),
            open_count: AtomicU32::new(0),
        }
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// State handle of the most recent session opened for `alias`.
    pub fn last_state(&self, alias: &str) -> Option<Arc<Mutex<FakeState>>> {
        self.opened
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .rev()
            .find(|(a, _)| a == alias)
            .map(|(_, s)| Arc::clone(s))
    }
}

impl SessionFactory for FakeFactory {
    fn open(&self, alias: &str) -> Result<Box<dyn BrowserSession>, AutobotError> {
        let dir = self.root.join(alias);
        std::fs::create_dir_all(&dir)?;
        let session = FakeSession::new(dir);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.opened
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((alias.to_string(), session.state()));
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn find_waits_then_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FakeSession::new(dir.path());
        let by = By::id("missing");
        let err = s.find(&by, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, AutobotError::ElementNotFound(_)));

        s.state().lock().unwrap().install(&by, "hello");
        let el = s.find(&by, Duration::from_millis(1)).unwrap();
        assert_eq!(s.text_of(&el).unwrap(), "hello");
    }

    #[test]
    fn tab_bookkeeping_matches_driver_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = FakeSession::new(dir.path());
        let tab = s.open_tab().unwrap();
        assert_eq!(s.window_handles().unwrap().len(), 2);
        s.switch_window(&tab).unwrap();
        s.close_window().unwrap();
        assert_eq!(s.window_handles().unwrap(), vec!["main".to_string()]);
        assert_eq!(s.current_window().unwrap(), "main");
    }

    #[test]
    fn interrupt_is_visible_across_clones() {
        let dir = tempfile::tempdir().unwrap();
        let s = FakeSession::new(dir.path());
        let state = s.state();
        s.interrupt().quit();
        assert!(state.lock().unwrap().quit);
    }
}
