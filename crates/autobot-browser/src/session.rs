use std::path::Path;
use std::time::{Duration, Instant};

use autobot_core::AutobotError;

// ── Locators ─────────────────────────────────────────────────────────────────

/// Element locator. Portal ids routinely contain dots
/// (`AuthenticationFG.USER_PRINCIPAL`), so `Id`/`Name` are matched via
/// attribute XPath rather than CSS shorthand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum By {
    Css(String),
    Id(String),
    Name(String),
    LinkText(String),
    XPath(String),
}

impl By {
    pub fn css(s: impl Into<String>) -> Self {
        By::Css(s.into())
    }
    pub fn id(s: impl Into<String>) -> Self {
        By::Id(s.into())
    }
    pub fn name(s: impl Into<String>) -> Self {
        By::Name(s.into())
    }
    pub fn link_text(s: impl Into<String>) -> Self {
        By::LinkText(s.into())
    }
    pub fn xpath(s: impl Into<String>) -> Self {
        By::XPath(s.into())
    }

    /// (strategy, value) pair in wire-protocol terms.
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            By::Css(s) => ("css selector", s.clone()),
            By::Id(s) => ("xpath", format!("//*[@id={}]", xpath_quote(s))),
            By::Name(s) => ("xpath", format!("//*[@name={}]", xpath_quote(s))),
            By::LinkText(s) => ("link text", s.clone()),
            By::XPath(s) => ("xpath", s.clone()),
        }
    }
}

impl std::fmt::Display for By {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            By::Css(s) => write!(f, "css={s}"),
            By::Id(s) => write!(f, "id={s}"),
            By::Name(s) => write!(f, "name={s}"),
            By::LinkText(s) => write!(f, "link={s}"),
            By::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Quote a literal for embedding in an XPath expression.
fn xpath_quote(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        // concat() for strings holding both quote kinds
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(r#", "'", "#))
    }
}

/// Opaque reference to an element located in the current page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementHandle(pub String);

// ── BrowserSession ───────────────────────────────────────────────────────────

/// One isolated browser, exclusively owned by a single worker thread.
///
/// Every method takes `&mut self`: sessions are never shared across threads.
/// `interrupt()` is the one cross-thread affordance; see
/// [`SessionInterrupt`].
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> Result<(), AutobotError>;
    fn current_url(&mut self) -> Result<String, AutobotError>;
    fn title(&mut self) -> Result<String, AutobotError>;
    fn page_source(&mut self) -> Result<String, AutobotError>;

    /// Locate an element if present right now; `Ok(None)` when absent.
    fn try_find(&mut self, by: &By) -> Result<Option<ElementHandle>, AutobotError>;
    fn find_all(&mut self, by: &By) -> Result<Vec<ElementHandle>, AutobotError>;

    fn click(&mut self, el: &ElementHandle) -> Result<(), AutobotError>;
    /// Click via script, for elements an overlay intercepts.
    fn js_click(&mut self, el: &ElementHandle) -> Result<(), AutobotError>;
    fn type_text(&mut self, el: &ElementHandle, text: &str) -> Result<(), AutobotError>;
    fn clear(&mut self, el: &ElementHandle) -> Result<(), AutobotError>;
    fn text_of(&mut self, el: &ElementHandle) -> Result<String, AutobotError>;
    fn is_displayed(&mut self, el: &ElementHandle) -> Result<bool, AutobotError>;

    /// Set an input's value directly (used on readonly date fields).
    fn set_value(&mut self, el: &ElementHandle, value: &str) -> Result<(), AutobotError>;
    fn remove_readonly(&mut self, el: &ElementHandle) -> Result<(), AutobotError>;
    fn scroll_into_view(&mut self, el: &ElementHandle) -> Result<(), AutobotError>;
    fn execute_script(&mut self, script: &str) -> Result<serde_json::Value, AutobotError>;

    /// PNG bytes of one element.
    fn screenshot_element(&mut self, el: &ElementHandle) -> Result<Vec<u8>, AutobotError>;
    /// PNG bytes of the current viewport.
    fn screenshot(&mut self) -> Result<Vec<u8>, AutobotError>;

    fn window_handles(&mut self) -> Result<Vec<String>, AutobotError>;
    fn current_window(&mut self) -> Result<String, AutobotError>;
    fn switch_window(&mut self, handle: &str) -> Result<(), AutobotError>;
    /// Open a fresh blank tab and return its handle (focus unchanged).
    fn open_tab(&mut self) -> Result<String, AutobotError>;
    /// Close the currently focused window.
    fn close_window(&mut self) -> Result<(), AutobotError>;

    /// Download directory exclusively owned by this session's worker.
    fn download_dir(&self) -> &Path;

    /// Cross-thread kill switch for this session.
    fn interrupt(&self) -> Box<dyn SessionInterrupt>;

    fn quit(&mut self) -> Result<(), AutobotError>;

    // ── provided ─────────────────────────────────────────────────────────────

    /// Wait until the locator matches, polling at 500 ms.
    fn find(&mut self, by: &By, timeout: Duration) -> Result<ElementHandle, AutobotError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(el) = self.try_find(by)? {
                return Ok(el);
            }
            if Instant::now() >= deadline {
                return Err(AutobotError::ElementNotFound(by.to_string()));
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    /// Wait until the locator matches a *displayed* element.
    fn find_visible(&mut self, by: &By, timeout: Duration) -> Result<ElementHandle, AutobotError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(el) = self.try_find(by)? {
                if self.is_displayed(&el).unwrap_or(false) {
                    return Ok(el);
                }
            }
            if Instant::now() >= deadline {
                return Err(AutobotError::ElementNotFound(by.to_string()));
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    /// Scroll to the element and click, falling back to a script click.
    fn click_robust(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.scroll_into_view(el)?;
        if self.click(el).is_err() {
            self.js_click(el)?;
        }
        Ok(())
    }
}

/// Handle that lets another thread tear a session down, interrupting any
/// in-flight driver call. `StopWorker` uses this before joining the thread.
pub trait SessionInterrupt: Send + Sync {
    fn quit(&self);
}

// ── SessionFactory ───────────────────────────────────────────────────────────

/// Opens one isolated session per alias, with a dedicated profile directory
/// (reused across restarts of the alias) and download directory.
pub trait SessionFactory: Send + Sync {
    fn open(&self, alias: &str) -> Result<Box<dyn BrowserSession>, AutobotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_locator_survives_dotted_ids() {
        let (strategy, value) = By::id("AuthenticationFG.USER_PRINCIPAL").strategy();
        assert_eq!(strategy, "xpath");
        assert_eq!(value, "//*[@id='AuthenticationFG.USER_PRINCIPAL']");
    }

    #[test]
    fn xpath_quote_handles_apostrophes() {
        assert_eq!(xpath_quote("plain"), "'plain'");
        assert_eq!(xpath_quote("it's"), "\"it's\"");
    }
}
