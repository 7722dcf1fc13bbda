//! Indian Overseas Bank, retail and corporate.
//!
//! The flavor is decided per credential: the `IOB Corporate` label (or an
//! `_iobcorp` alias) logs in with login id + user id + password, retail with
//! the canonical auth id. The CAPTCHA is six case-sensitive characters and
//! the portal announces a rejected one in `div.otpmsg span.red`. Statement
//! export is CSV; the date cutover is 6 a.m. and the statement form wants
//! `MM/DD/YYYY`. Uploads always go out under the plain `IOB` label.

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::By;
use autobot_captcha::SolveOptions;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://netbanking.iob.bank.in/ibanking/html/index.html";

const LOGGED_OUT_MARKER: &str =
    "You are Logged OUT of internet banking due to ANY of the following reasons";

#[derive(Default)]
pub struct IobAdapter {
    captcha_ticket: Option<String>,
}

impl IobAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_corporate(ctx: &AdapterCtx<'_>) -> bool {
        ctx.cred.bank_label.to_uppercase().contains("CORPORATE")
            || ctx.alias.to_lowercase().ends_with("_iobcorp")
    }
}

impl BankAdapter for IobAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Iob
    }

    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        ctx.session.navigate(LOGIN_URL)?;
        let cont = ctx.session.find(
            &By::link_text("Continue to Internet Banking Home Page"),
            WAIT,
        )?;
        ctx.session.click(&cont)?;

        let corporate = Self::is_corporate(ctx);
        let role = if corporate { "Corporate Login" } else { "Personal Login" };
        let role_link = ctx.session.find(&By::link_text(role), WAIT)?;
        ctx.session.click(&role_link)?;

        if corporate {
            let login_id = ctx.cred.login_id.clone();
            let user_id = ctx.cred.user_id.clone();
            let el = ctx.session.find(&By::name("loginId"), WAIT)?;
            ctx.session.type_text(&el, &login_id)?;
            let el = ctx.session.find(&By::name("userId"), WAIT)?;
            ctx.session.type_text(&el, &user_id)?;
        } else {
            let user = ctx.cred.auth_id().to_string();
            let el = ctx.session.find(&By::name("loginId"), WAIT)?;
            ctx.session.type_text(&el, &user)?;
        }
        let password = ctx.cred.password.clone();
        let el = ctx.session.find(&By::name("password"), WAIT)?;
        ctx.session.type_text(&el, &password)?;

        // Scroll the CAPTCHA fully into view before capturing it, or the
        // element shot gets cropped at the viewport edge.
        let img = ctx
            .session
            .find(&By::id("captchaimg"), Duration::from_secs(10))?;
        ctx.session.scroll_into_view(&img)?;
        std::thread::sleep(Duration::from_secs(1));
        let img = ctx.session.find_visible(&By::id("captchaimg"), Duration::from_secs(10))?;
        let png = ctx.session.screenshot_element(&img)?;

        let (solution, ticket) = ctx.solve_captcha(&png, SolveOptions::exact_len(6))?;
        self.captcha_ticket = ticket;
        // The portal is case-sensitive and the service keeps returning
        // lowercase; force uppercase like the portal's own keypad does.
        let code: String = solution.split_whitespace().collect::<String>().to_uppercase();

        let field = ctx.session.find(&By::name("captchaid"), WAIT)?;
        helpers::fill(ctx, &field, &code)?;
        let submit = ctx.session.find(&By::id("btnSubmit"), WAIT)?;
        ctx.session.click(&submit)?;

        // A wrong CAPTCHA shows up within a few seconds.
        if let Ok(err_span) = ctx
            .session
            .find(&By::css("div.otpmsg span.red"), Duration::from_secs(5))
        {
            let text = ctx.session.text_of(&err_span).unwrap_or_default();
            if text.to_lowercase().contains("captcha entered is incorrect") {
                return Err(AutobotError::CaptchaWrong {
                    ticket: self.captcha_ticket.take(),
                });
            }
        }

        ctx.session.find(&By::css("nav.accordian"), WAIT)?;
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        // IOB is slow to render its nav; give the statement link a minute.
        let stmt = ctx.session.find(
            &By::link_text("Account statement"),
            Duration::from_secs(60),
        )?;
        ctx.session.click_robust(&stmt)?;

        // Pick our account by prefix in the dropdown.
        let acct_no = ctx.cred.account_number.clone();
        ctx.session.find(&By::id("accountNo"), WAIT)?;
        let option = ctx.session.find(
            &By::xpath(format!(
                "//select[@id='accountNo']/option[starts-with(normalize-space(text()),'{acct_no}')]"
            )),
            WAIT,
        )?;
        ctx.session.click(&option)?;

        let (from, to) = ctx.date_window(self.kind().cutover_hour()).as_mdy();
        helpers::fill_date(ctx, &By::id("fromDate"), &from)?;
        helpers::fill_date(ctx, &By::id("toDate"), &to)?;

        let view = ctx.session.find(&By::id("accountstatement_view"), WAIT)?;
        ctx.session.click_robust(&view)?;

        helpers::download_after(ctx, &[".csv"], |ctx| {
            let csv_btn = ctx
                .session
                .find(&By::id("accountstatement_csvAcctStmt"), WAIT)?;
            ctx.session.click_robust(&csv_btn)
        })
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        ctx.session.execute_script("window.scrollTo(0, 0);")?;
        let link = ctx.session.find(
            &By::link_text("Balance Enquiry"),
            Duration::from_secs(60),
        )?;
        ctx.session.click_robust(&link)?;

        let acct_no = ctx.cred.account_number.clone();
        let acct_link = ctx.session.find(
            &By::xpath(format!(
                "//a[contains(@href,'getBalance') and contains(.,'{acct_no}')]"
            )),
            Duration::from_secs(180),
        )?;
        ctx.session.click_robust(&acct_link)?;

        let cell = ctx.session.find(
            &By::css("#dialogtbl table tr.querytr td"),
            Duration::from_secs(180),
        )?;
        let balance = ctx.session.text_of(&cell)?;

        // Drop the modal overlay so later clicks are not intercepted, then
        // park back on the statement page for the next cycle.
        let _ = ctx.session.execute_script(
            "document.querySelectorAll('.ui-widget-overlay, #dialogtbl')\
             .forEach(el => el.remove());",
        );
        if let Ok(stmt) = ctx.session.find(
            &By::link_text("Account statement"),
            Duration::from_secs(60),
        ) {
            let _ = ctx.session.click_robust(&stmt);
        }

        Ok(balance)
    }

    fn detect_logged_out(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<bool, AutobotError> {
        Ok(ctx
            .session
            .page_source()
            .map(|source| source.contains(LOGGED_OUT_MARKER))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autobot_browser::fake::FakeSession;
    use autobot_browser::BrowserSession;
    use autobot_core::Credential;
    use autobot_messenger::memory::MemoryTransport;
    use autobot_messenger::Messenger;
    use autobot_worker::{StopSignal, WorkerShared, WorkerTuning};

    fn ctx_parts(alias: &str) -> (Messenger, WorkerShared, StopSignal, WorkerTuning) {
        let cred = Credential::from_fields(alias, "lid", "uid", "", "pw", "999");
        (
            Messenger::spawn(Box::new(MemoryTransport::new()), 1, false),
            WorkerShared::new(alias, cred),
            StopSignal::new(),
            WorkerTuning::default(),
        )
    }

    fn ctx<'a>(
        alias: &'a str,
        session: &'a mut dyn BrowserSession,
        parts: &'a (Messenger, WorkerShared, StopSignal, WorkerTuning),
    ) -> AdapterCtx<'a> {
        AdapterCtx {
            alias,
            cred: parts.1.cred_snapshot(),
            session,
            solver: None,
            messenger: &parts.0,
            shared: &parts.1,
            stop: &parts.2,
            tuning: &parts.3,
            date_override: None,
        }
    }

    #[test]
    fn corporate_flavor_comes_from_label_or_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession::new(dir.path());
        let parts = ctx_parts("shop_iobcorp");
        let c = ctx("shop_iobcorp", &mut session, &parts);
        assert!(IobAdapter::is_corporate(&c));
        drop(c);

        let parts = ctx_parts("shop_iob");
        let c = ctx("shop_iob", &mut session, &parts);
        assert!(!IobAdapter::is_corporate(&c));
    }

    #[test]
    fn logged_out_marker_is_detected_from_page_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = FakeSession::new(dir.path());
        session.state().lock().unwrap().page_source = format!("<html>{LOGGED_OUT_MARKER}</html>");

        let parts = ctx_parts("shop_iob");
        let mut adapter = IobAdapter::new();
        let mut c = ctx("shop_iob", &mut session, &parts);
        assert!(adapter.detect_logged_out(&mut c).unwrap());
    }
}
