//! IDFC First Bank.
//!
//! Login is username → password → OTP; the OTP always comes from the chat
//! (300 s bound). Balance is the "Net Withdrawal" effective-balance figure on
//! the Accounts tab. Statement download drives a React datepicker and
//! prefers XLSX, falling back to XLS.

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::{By, ElementHandle};
use autobot_core::datewindow::DateWindow;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://my.idfcfirstbank.com/login";

#[derive(Default)]
pub struct IdfcAdapter;

impl IdfcAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Drive the React datepicker attached to `field_id` to `target`.
    fn pick_date(
        &self,
        ctx: &mut AdapterCtx<'_>,
        field_id: &str,
        target: chrono::NaiveDate,
    ) -> Result<(), AutobotError> {
        use chrono::Datelike;

        let input = ctx.session.find(&By::id(field_id), WAIT)?;
        ctx.session.click(&input)?;

        let header = "//div[contains(@class,'react-datepicker__header')]";
        ctx.session
            .find(&By::xpath(header), Duration::from_secs(10))?;

        // Month select is zero-based, year select goes by visible text.
        let month_option: ElementHandle = ctx.session.find(
            &By::xpath(format!("({header}//select)[1]/option[{}]", target.month())),
            Duration::from_secs(10),
        )?;
        ctx.session.click(&month_option)?;
        let year_option = ctx.session.find(
            &By::xpath(format!(
                "({header}//select)[2]/option[normalize-space(text())='{}']",
                target.year()
            )),
            Duration::from_secs(10),
        )?;
        ctx.session.click(&year_option)?;

        let day = ctx.session.find(
            &By::xpath(format!(
                "//div[contains(@class,'react-datepicker__day') \
                 and not(contains(@class,'--outside-month')) and text()='{}']",
                target.day()
            )),
            Duration::from_secs(10),
        )?;
        ctx.session.click(&day)
    }
}

impl BankAdapter for IdfcAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Idfc
    }

    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        ctx.session.navigate(LOGIN_URL)?;

        let user = ctx.cred.auth_id().to_string();
        if user.is_empty() {
            return Err(AutobotError::Portal("missing username/auth_id".into()));
        }
        let user_input = ctx.session.find(&By::name("customerUserName"), WAIT)?;
        ctx.session.type_text(&user_input, &user)?;
        let proceed = ctx
            .session
            .find(&By::css("[data-testid='submit-button-id']"), WAIT)?;
        ctx.session.click(&proceed)?;

        let password = ctx.cred.password.clone();
        let pwd = ctx.session.find(&By::id("login-password-input"), WAIT)?;
        ctx.session.type_text(&pwd, &password)?;
        let login = ctx
            .session
            .find(&By::css("[data-testid='login-button']"), WAIT)?;
        ctx.session.click(&login)?;

        let otp = ctx.wait_for_otp()?;
        let otp_input = ctx.session.find(&By::name("otp"), WAIT)?;
        ctx.session.type_text(&otp_input, &otp)?;
        let verify = ctx
            .session
            .find(&By::css("[data-testid='verify-otp']"), WAIT)?;
        ctx.session.click(&verify)?;

        ctx.session.find(
            &By::css("span[data-testid='Accounts']"),
            Duration::from_secs(30),
        )?;
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        let accounts = ctx
            .session
            .find(&By::css("span[data-testid='Accounts']"), WAIT)?;
        ctx.session.click(&accounts)?;

        let dl = ctx
            .session
            .find(&By::css("[data-testid='download-statement-link']"), WAIT)?;
        ctx.session.click(&dl)?;

        // "Custom" range.
        let custom = ctx
            .session
            .find(&By::css("label[for='AccountStatementDate-4']"), WAIT)?;
        ctx.session.click(&custom)?;

        let DateWindow { from, to } = ctx.date_window(self.kind().cutover_hour());
        self.pick_date(ctx, "custom-from-date", from)?;
        self.pick_date(ctx, "custom-to-date", to)?;

        let format_dd = ctx
            .session
            .find(&By::id("select-account-statement-format"), WAIT)?;
        ctx.session.click(&format_dd)?;
        let excel = ctx.session.find(
            &By::xpath(
                "//ul[@id='select-account-statement-format-list']//span[text()='Excel']",
            ),
            WAIT,
        )?;
        ctx.session.click(&excel)?;

        let file = helpers::download_after(ctx, &[".xlsx", ".xls"], |ctx| {
            let download = ctx
                .session
                .find(&By::css("[data-testid='PrimaryAction']"), WAIT)?;
            ctx.session.click(&download)
        })?;

        // Close the statement modal so the next cycle starts clean.
        if let Some(cross) = ctx.session.try_find(&By::css("[aria-label='Cross']"))? {
            let _ = ctx.session.click(&cross);
        }
        Ok(file)
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        let accounts = ctx
            .session
            .find(&By::css("span[data-testid='Accounts']"), WAIT)?;
        ctx.session.click(&accounts)?;
        let amount = ctx.session.find(
            &By::css("[data-testid='AccountEffectiveBalance-amount']"),
            WAIT,
        )?;
        ctx.session.text_of(&amount)
    }
}
