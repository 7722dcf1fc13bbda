//! IDBI Bank.
//!
//! Finacle-style login (CAPTCHA, then password + target checkbox, submitted
//! with Enter). Balance comes from the INR cell of the account's summary row;
//! the statement flow clicks through that row's "A/C Statement" link, fills
//! the 5 a.m.-cutover window and downloads the XLS report variant.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use autobot_browser::By;
use autobot_captcha::SolveOptions;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://inet.idbibank.co.in/";

#[derive(Default)]
pub struct IdbiAdapter {
    captcha_ticket: Option<String>,
}

impl IdbiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_row_xpath(acct: &str) -> String {
        format!("//span[normalize-space(text())='{acct}']/ancestor::tr")
    }
}

impl BankAdapter for IdbiAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Idbi
    }

    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        ctx.session.navigate(LOGIN_URL)?;

        let user_input = ctx
            .session
            .find(&By::id("AuthenticationFG.USER_PRINCIPAL"), WAIT)?;
        let user = ctx.cred.auth_id().to_string();
        if user.is_empty() {
            return Err(AutobotError::Portal("missing username/auth_id".into()));
        }
        ctx.session.type_text(&user_input, &user)?;

        let img = ctx.session.find(&By::id("IMAGECAPTCHA"), WAIT)?;
        let png = ctx.session.screenshot_element(&img)?;
        let (code, ticket) = ctx.solve_captcha(&png, SolveOptions::case_sensitive())?;
        self.captcha_ticket = ticket;

        let code_input = ctx
            .session
            .find(&By::id("AuthenticationFG.VERIFICATION_CODE"), WAIT)?;
        ctx.session.type_text(&code_input, &code)?;

        let cont = helpers::first_displayed(ctx, &By::id("STU_VALIDATE_CREDENTIALS"))?;
        ctx.session.click_robust(&cont)?;

        if let Ok(wrapper) = ctx.session.find(
            &By::css("span.errorCodeWrapper"),
            Duration::from_secs(15),
        ) {
            let text = ctx.session.text_of(&wrapper).unwrap_or_default();
            if text.to_lowercase().contains("enter the characters") {
                return Err(AutobotError::CaptchaWrong {
                    ticket: self.captcha_ticket.take(),
                });
            }
        }

        let password = ctx.cred.password.clone();
        let pwd = ctx
            .session
            .find(&By::id("AuthenticationFG.ACCESS_CODE"), WAIT)?;
        ctx.session.type_text(&pwd, &password)?;

        let checkbox = ctx.session.find(
            &By::xpath(
                "//input[@id='AuthenticationFG.TARGET_CHECKBOX']\
                 /following-sibling::span[contains(@class,'span-checkbox')]",
            ),
            WAIT,
        )?;
        ctx.session.click_robust(&checkbox)?;
        ctx.session.type_text(&pwd, "\n")?;

        // Post-login content is just the account grid.
        ctx.session.find(&By::css("table"), Duration::from_secs(60))?;
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        // From the summary row, open the statement page.
        let acct = ctx.cred.account_number.clone();
        let row = Self::account_row_xpath(&acct);
        let stmt_link = ctx.session.find(
            &By::xpath(format!("{row}//a[@title='A/C Statement']")),
            Duration::from_secs(60),
        )?;
        ctx.session.click_robust(&stmt_link)?;

        // The statement form can take minutes; a notification pane sometimes
        // blocks it and goes away when toggled.
        let from_by = By::name("TransactionHistoryFG.FROM_TXN_DATE");
        let deadline = Instant::now() + Duration::from_secs(300);
        loop {
            if ctx.session.try_find(&from_by)?.is_some() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AutobotError::Timeout(
                    "statement page did not load in time".into(),
                ));
            }
            if ctx.stop.is_set() {
                return Err(AutobotError::Cancelled);
            }
            if let Some(bell) = ctx.session.try_find(&By::id("span_HREF_Notifications"))? {
                let _ = ctx.session.click(&bell);
            }
            std::thread::sleep(Duration::from_secs(5));
        }

        let (from, to) = ctx.date_window(self.kind().cutover_hour()).as_dmy();
        helpers::fill_date(ctx, &from_by, &from)?;
        helpers::fill_date(ctx, &By::name("TransactionHistoryFG.TO_TXN_DATE"), &to)?;

        let view = ctx
            .session
            .find(&By::name("Action.SEARCH"), Duration::from_secs(30))?;
        ctx.session.click_robust(&view)?;

        ctx.session
            .find(&By::css("span.downloadtext"), Duration::from_secs(120))?;

        helpers::download_after(ctx, &[".xls"], |ctx| {
            let xls_btn = ctx.session.find(
                &By::xpath(
                    "//input[@name='Action.GENERATE_REPORT' \
                     and contains(@onclick,'setOutformat(4')]",
                ),
                Duration::from_secs(60),
            )?;
            ctx.session.click_robust(&xls_btn)
        })
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        let acct = ctx.cred.account_number.clone();
        if acct.is_empty() {
            return Err(AutobotError::Portal("missing account_number".into()));
        }
        let cell = ctx.session.find(
            &By::xpath(format!(
                "{}//td[contains(normalize-space(.),'INR')]",
                Self::account_row_xpath(&acct)
            )),
            Duration::from_secs(60),
        )?;
        ctx.session.text_of(&cell)
    }
}
