//! Kerala Gramin Bank.
//!
//! Two-step login: username + CAPTCHA first, then a confirmation checkbox
//! and the password. The statement page occasionally claims "transactions do
//! not exist" right after a search and recovers on a re-click; that gets
//! three tries. This is the one adapter honoring the supervisor's date-range
//! override; without one the 6 a.m. cutover applies. Statements are XLS and
//! upload under the exact label "Kerala Gramin Bank".

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::By;
use autobot_captcha::SolveOptions;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://netbanking.kgb.bank.in/";

const FROM_DATE: &str = "PageConfigurationMaster_RXACBSW__1:TransactionHistoryFG.FROM_TXN_DATE";
const TO_DATE: &str = "PageConfigurationMaster_RXACBSW__1:TransactionHistoryFG.TO_TXN_DATE";
const SEARCH_BTN: &str = "PageConfigurationMaster_RXACBSW__1:SEARCH";
const GENERATE_BTN: &str = "PageConfigurationMaster_RXACBSW__1:GENERATE_REPORT";

#[derive(Default)]
pub struct KgbAdapter {
    captcha_ticket: Option<String>,
}

impl KgbAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_row_xpath(acct: &str) -> String {
        format!("//table//tr[td[1][normalize-space(text())='{acct}']]")
    }

    /// Open the Account Statement grid and click through to our account.
    fn open_statement_for_account(
        &self,
        ctx: &mut AdapterCtx<'_>,
    ) -> Result<(), AutobotError> {
        let link = ctx
            .session
            .find(&By::link_text("Account Statement"), WAIT)?;
        ctx.session.click_robust(&link)?;
        ctx.session.find(&By::css("table tbody tr"), WAIT)?;

        let acct = ctx.cred.account_number.clone();
        let row = Self::account_row_xpath(&acct);
        let nickname = match ctx
            .session
            .try_find(&By::xpath(format!("{row}//a[@title='Account Nickname']")))?
        {
            Some(el) => el,
            None => ctx
                .session
                .find(&By::xpath(format!("{row}//td[2]//a")), WAIT)
                .map_err(|_| {
                    AutobotError::Portal(format!("account {acct} not found in summary grid"))
                })?,
        };
        ctx.session.click_robust(&nickname)
    }
}

impl BankAdapter for KgbAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Kgb
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

        let submit = helpers::first_displayed(ctx, &By::id("STU_VALIDATE_CREDENTIALS"))?;
        ctx.session.click_robust(&submit)?;

        // A rejected CAPTCHA surfaces in the error wrapper within seconds.
        if let Ok(err) = ctx.session.find(
            &By::css("span.errorCodeWrapper p"),
            Duration::from_secs(5),
        ) {
            let text = ctx.session.text_of(&err).unwrap_or_default();
            if text.to_lowercase().contains("enter the characters") {
                return Err(AutobotError::CaptchaWrong {
                    ticket: self.captcha_ticket.take(),
                });
            }
        }

        // Second factor: confirmation checkbox, then password + Enter.
        let checkbox = ctx
            .session
            .find(&By::css("span.span-checkbox"), Duration::from_secs(30))?;
        ctx.session.click_robust(&checkbox)?;

        let password = ctx.cred.password.clone();
        let pwd = ctx
            .session
            .find(&By::id("AuthenticationFG.ACCESS_CODE"), WAIT)?;
        ctx.session.type_text(&pwd, &format!("{password}\n"))?;

        ctx.session
            .find(&By::link_text("Account Statement"), WAIT)?;
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        self.open_statement_for_account(ctx)?;
        ctx.session.find(&By::id(FROM_DATE), WAIT)?;

        let (from, to) = ctx.date_window(self.kind().cutover_hour()).as_dmy();
        helpers::fill_date(ctx, &By::id(FROM_DATE), &from)?;
        helpers::fill_date(ctx, &By::id(TO_DATE), &to)?;

        let search = ctx.session.find(&By::id(SEARCH_BTN), WAIT)?;
        ctx.session.click_robust(&search)?;

        // Transient "transactions do not exist" needs a re-search.
        let mut attempts = 0;
        loop {
            std::thread::sleep(Duration::from_secs(2));
            let transient = match ctx
                .session
                .try_find(&By::css("div.error-box, .errormessages"))?
            {
                Some(err_box) => ctx
                    .session
                    .text_of(&err_box)
                    .unwrap_or_default()
                    .contains("do not exist for the account"),
                None => false,
            };
            if !transient {
                break;
            }
            attempts += 1;
            if attempts >= 3 {
                return Err(AutobotError::Timeout(
                    "no transactions after 3 search attempts".into(),
                ));
            }
            ctx.info(format!("No transactions found; retrying search… ({attempts}/3)"));
            ctx.session.click_robust(&search)?;
        }

        // The OUTFORMAT select hides behind a styled dropdown; force it.
        ctx.session
            .find(&By::css("select[name=\"TransactionHistoryFG.OUTFORMAT\"]"), WAIT)?;
        ctx.session.execute_script(
            r#"const s = document.querySelector('select[name="TransactionHistoryFG.OUTFORMAT"]');
               for (let i = 0; i < s.options.length; i++) {
                   if ((s.options[i].text || '').trim() === 'XLS') {
                       s.selectedIndex = i;
                       s.dispatchEvent(new Event('change', {bubbles: true}));
                       break;
                   }
               }"#,
        )?;

        helpers::download_after(ctx, &[".xls"], |ctx| {
            let generate = ctx.session.find(&By::id(GENERATE_BTN), WAIT)?;
            ctx.session.click_robust(&generate)
        })
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        let link = ctx
            .session
            .find(&By::link_text("Account Statement"), WAIT)?;
        ctx.session.click_robust(&link)?;
        ctx.session.find(&By::css("table tbody tr"), WAIT)?;

        let acct = ctx.cred.account_number.clone();
        let row = Self::account_row_xpath(&acct);
        if let Some(span) = ctx.session.try_find(&By::xpath(format!(
            "{row}//span[contains(@class,'hwgreentxt') and contains(@class,'amountRightAlign')]"
        )))? {
            return ctx.session.text_of(&span);
        }
        // Fallback: whatever sits in the balance column.
        let cell = ctx
            .session
            .find(&By::xpath(format!("{row}/td[4]")), WAIT)?;
        let text = ctx.session.text_of(&cell)?;
        Ok(text
            .lines()
            .last()
            .and_then(|l| l.split_whitespace().last())
            .unwrap_or_default()
            .to_string())
    }
}
