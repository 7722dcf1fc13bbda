//! autobot-sink — AutoBank statement uploads.
//!
//! Every worker funnels statements through this client. It drives an
//! already-open browser tab: ensure the operator session is live, pick the
//! bank from the dropdown by its exact visible text, fill the unmasked
//! account number, feed the file input, and wait for the portal's success
//! signal (icon or body text). Retrying is the worker runtime's job, not
//! ours.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use autobot_browser::{BrowserSession, By};
use autobot_core::AutobotError;

const WAIT: Duration = Duration::from_secs(20);
const SUCCESS_WAIT: Duration = Duration::from_secs(30);

/// The worker runtime's view of the sink: one upload attempt against the
/// currently focused tab.
pub trait Uploader: Send {
    fn upload(
        &self,
        session: &mut dyn BrowserSession,
        bank_label: &str,
        account_number: &str,
        file: &Path,
    ) -> Result<(), AutobotError>;
}

/// Upload client bound to a portal URL (`…/bankupload.php`).
#[derive(Clone, Debug)]
pub struct StatementSink {
    upload_url: String,
}

impl StatementSink {
    pub fn new(upload_url: impl Into<String>) -> Self {
        StatementSink {
            upload_url: upload_url.into(),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Operator landing page derived from the upload URL.
    fn index_url(&self) -> String {
        match self.upload_url.rsplit_once('/') {
            Some((root, _)) => format!("{root}/operator_index.php"),
            None => self.upload_url.clone(),
        }
    }

    /// Make sure the operator session is live in the current tab.
    pub fn ensure_logged_in(&self, session: &mut dyn BrowserSession) -> Result<(), AutobotError> {
        session.navigate(&self.index_url())?;
        if session.find(&By::id("sidebar"), WAIT).is_ok() {
            return Ok(());
        }
        // Session expired; the landing page shows a sign-in button instead.
        let auth_btn = session.find(
            &By::xpath(
                "//a[contains(@class,'auth-form-btn')] \
                 | //button[contains(@onclick,'getToken') \
                 or normalize-space()='Sign In' or normalize-space()='SIGN IN']",
            ),
            WAIT,
        )?;
        session.click_robust(&auth_btn)?;
        session.find(&By::id("sidebar"), WAIT)?;
        Ok(())
    }

    /// One upload attempt for `(bank_label, account_number, file)`.
    pub fn upload(
        &self,
        session: &mut dyn BrowserSession,
        bank_label: &str,
        account_number: &str,
        file: &Path,
    ) -> Result<(), AutobotError> {
        self.ensure_logged_in(session)?;
        session.navigate(&self.upload_url)?;
        session.find(&By::id("drop-zone"), WAIT)?;

        // Bank <select>: pick the option whose visible text matches exactly.
        session.find(&By::id("bank"), WAIT)?;
        let option = session.find(
            &By::xpath(format!(
                "//select[@id='bank']/option[normalize-space(text())='{bank_label}']"
            )),
            WAIT,
        )?;
        session.click(&option)?;

        let acct = session.find(&By::id("account_number"), WAIT)?;
        session.clear(&acct)?;
        session.type_text(&acct, account_number)?;

        let file_input = session.find(&By::id("file_input"), WAIT)?;
        session.type_text(&file_input, &file.display().to_string())?;

        self.wait_for_success(session)?;
        info!(bank = bank_label, file = %file.display(), "statement uploaded");
        Ok(())
    }

    /// Success icon or "Upload successful" body text; timeout on both fails
    /// the attempt. The favicon alone is not trustworthy on this portal.
    fn wait_for_success(&self, session: &mut dyn BrowserSession) -> Result<(), AutobotError> {
        let deadline = Instant::now() + SUCCESS_WAIT;
        loop {
            if let Some(icon) = session.try_find(&By::css(".swal2-icon-success"))? {
                if session.is_displayed(&icon).unwrap_or(false) {
                    return Ok(());
                }
            }
            if session.page_source()?.contains("Upload successful") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!("no success signal from upload portal");
                return Err(AutobotError::Timeout(
                    "upload portal showed no success signal".into(),
                ));
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }
}

impl Uploader for StatementSink {
    fn upload(
        &self,
        session: &mut dyn BrowserSession,
        bank_label: &str,
        account_number: &str,
        file: &Path,
    ) -> Result<(), AutobotError> {
        StatementSink::upload(self, session, bank_label, account_number, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_browser::fake::FakeSession;

    fn ready_session(dir: &Path) -> FakeSession {
        let session = FakeSession::new(dir);
        {
            let state = session.state();
            let mut st = state.lock().unwrap();
            st.install(&By::id("sidebar"), "");
            st.install(&By::id("drop-zone"), "");
            st.install(&By::id("bank"), "");
            st.install(
                &By::xpath(
                    "//select[@id='bank']/option[normalize-space(text())='Kerala Gramin Bank']",
                ),
                "Kerala Gramin Bank",
            );
            st.install(&By::id("account_number"), "");
            st.install(&By::id("file_input"), "");
            st.page_source = "… Upload successful …".into();
        }
        session
    }

    #[test]
    fn upload_fills_form_and_sees_success_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ready_session(dir.path());
        let sink = StatementSink::new("https://autobank.payatom.in/bankupload.php");
        sink.upload(
            &mut session,
            "Kerala Gramin Bank",
            "1234567890",
            Path::new("/tmp/stmt.xls"),
        )
        .unwrap();

        let state = session.state();
        let st = state.lock().unwrap();
        assert!(st.clicked("Kerala Gramin Bank"));
        assert!(st.actions.iter().any(|a| a.contains("1234567890")));
        assert!(st.actions.iter().any(|a| a.contains("/tmp/stmt.xls")));
    }

    #[test]
    fn index_url_is_sibling_of_upload_url() {
        let sink = StatementSink::new("https://autobank.payatom.in/bankupload.php");
        assert_eq!(
            sink.index_url(),
            "https://autobank.payatom.in/operator_index.php"
        );
    }
}
