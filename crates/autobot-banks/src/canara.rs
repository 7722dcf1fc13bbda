//! Canara Bank (Oracle JET portal).
//!
//! The noisiest login of the set: an initial popup barrage, username +
//! password + CAPTCHA (auto-solve or a 180 s manual window), an optional OTP
//! challenge with an invalid-OTP retry loop, and a post-login "Ok" popup.
//! Statements export as CSV through a chain of JET dropdowns.

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::By;
use autobot_captcha::SolveOptions;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://online.canarabank.bank.in/?module=login";

#[derive(Default)]
pub struct CanaraAdapter {
    captcha_ticket: Option<String>,
}

impl CanaraAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best-effort dismissal of the initial popup barrage: click the top
    /// right corner, then any generic Ok/Close button.
    fn dismiss_initial_popups(&self, ctx: &mut AdapterCtx<'_>) {
        let _ = ctx.session.execute_script(
            "var el = document.elementFromPoint(window.innerWidth - 50, 50); \
             if (el) el.click();",
        );
        for text in ["Ok", "OK", "Okay", "Close"] {
            if let Ok(btn) = ctx
                .session
                .find(&helpers::by_span_button(text), Duration::from_secs(3))
            {
                let _ = ctx.session.click_robust(&btn);
                break;
            }
        }
    }

    /// The post-login "Ok" popup has shipped in three shapes so far.
    fn dismiss_post_login_ok(&self, ctx: &mut AdapterCtx<'_>) {
        let strategies = [
            (
                By::xpath(
                    "//oj-button[@id='pwdExpiryButton']\
                     //button[@class='oj-button-button oj-component-initnode']",
                ),
                Duration::from_secs(10),
            ),
            (
                By::xpath("//span[text()='Ok' and @class='oj-button-text']/ancestor::button"),
                Duration::from_secs(5),
            ),
            (By::css("a.modal-header__close"), Duration::from_secs(5)),
        ];
        for (by, wait) in strategies {
            if let Ok(btn) = ctx.session.find(&by, wait) {
                let _ = ctx.session.click_robust(&btn);
                return;
            }
        }
    }

    /// OTP challenge, when the portal raises one: consume chat-supplied codes
    /// until one is accepted, re-prompting on the invalid-OTP modal.
    fn handle_otp_if_present(&self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        let challenge = ctx.session.find(
            &By::xpath("//span[contains(text(),'One Time Password (OTP)')]"),
            Duration::from_secs(10),
        );
        if challenge.is_err() {
            ctx.info("No OTP challenge detected for Canara login.");
            return Ok(());
        }

        let otp_input = ctx
            .session
            .find(&By::id("otp|input"), Duration::from_secs(30))?;

        loop {
            let code = ctx.wait_for_otp()?;
            helpers::fill(ctx, &otp_input, &code)?;
            let submit = ctx.session.find(&helpers::by_span_button("Submit"), WAIT)?;
            ctx.session.click_robust(&submit)?;

            // Invalid-OTP modal appears within a few seconds.
            match ctx.session.find(
                &By::xpath("//span[contains(@data-bind,'modalMessage')]"),
                Duration::from_secs(5),
            ) {
                Ok(msg) => {
                    let text = ctx.session.text_of(&msg).unwrap_or_default();
                    if text.to_lowercase().contains("invalid") {
                        ctx.info("OTP invalid. Waiting for a new OTP…");
                        if let Ok(ok_btn) = ctx
                            .session
                            .find(&helpers::by_span_button("Okay"), Duration::from_secs(5))
                        {
                            let _ = ctx.session.click_robust(&ok_btn);
                        }
                        continue;
                    }
                    return Ok(());
                }
                Err(_) => return Ok(()),
            }
        }
    }

    /// JET dropdown: open the choice box, click the option whose text
    /// contains (or equals) `text`.
    fn pick_dropdown(
        &self,
        ctx: &mut AdapterCtx<'_>,
        choice: &By,
        option: &By,
    ) -> Result<(), AutobotError> {
        let box_el = ctx.session.find(choice, WAIT)?;
        ctx.session.click_robust(&box_el)?;
        std::thread::sleep(Duration::from_millis(500));
        let opt = ctx.session.find(option, WAIT)?;
        ctx.session.click_robust(&opt)
    }

    fn open_statement_page(&self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        // The Accounts & Services group may already be expanded.
        if let Ok(group) = ctx.session.find(
            &By::xpath(
                "//div[contains(@class,'oj-navigationlist-group-item')]\
                 [.//span[contains(@class,'group-item-label') \
                 and contains(.,'Accounts & Services')]]//a",
            ),
            Duration::from_secs(5),
        ) {
            let _ = ctx.session.click_robust(&group);
        }

        for label in ["Account Statement", "View/Download Account Statement"] {
            let link = ctx.session.find(
                &By::xpath(format!(
                    "//span[@class='oj-navigationlist-item-label' \
                     and normalize-space(text())='{label}']/ancestor::a[1]"
                )),
                WAIT,
            )?;
            ctx.session.click_robust(&link)?;
        }

        ctx.session.find(
            &By::xpath(
                "//div[contains(@class,'oj-select-choice') \
                 and @aria-label='Select Account Number']",
            ),
            WAIT,
        )?;
        Ok(())
    }
}

impl BankAdapter for CanaraAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Canara
    }

    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        ctx.session.navigate(LOGIN_URL)?;
        std::thread::sleep(Duration::from_secs(5));
        self.dismiss_initial_popups(ctx);

        let user = ctx.cred.auth_id().to_string();
        if user.is_empty() {
            return Err(AutobotError::Portal("missing username/auth_id".into()));
        }
        let user_input = ctx.session.find(&By::id("login_username|input"), WAIT)?;
        helpers::fill(ctx, &user_input, &user)?;
        let password = ctx.cred.password.clone();
        let pwd_input = ctx.session.find(&By::id("login_password|input"), WAIT)?;
        helpers::fill(ctx, &pwd_input, &password)?;

        let img = ctx
            .session
            .find_visible(&By::css("#imageCaptcha img.customCaptcha"), WAIT)?;
        ctx.session.scroll_into_view(&img)?;
        std::thread::sleep(Duration::from_secs(3));
        let png = ctx.session.screenshot_element(&img)?;
        let (code, ticket) = ctx.solve_captcha(&png, SolveOptions::case_sensitive())?;
        self.captcha_ticket = ticket;

        let captcha_input = ctx.session.find(&By::id("captchaid|input"), WAIT)?;
        helpers::fill(ctx, &captcha_input, &code)?;
        let login_btn = ctx.session.find(&helpers::by_span_button("LOGIN"), WAIT)?;
        ctx.session.click_robust(&login_btn)?;

        self.handle_otp_if_present(ctx)?;

        ctx.session.find(
            &By::xpath(
                "//span[contains(@class,'group-item-label') \
                 and contains(., 'Accounts & Services')]",
            ),
            WAIT,
        )?;
        self.dismiss_post_login_ok(ctx);
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        self.open_statement_page(ctx)?;

        // Account picker is tolerant: a missing entry keeps the default.
        let acct = ctx.cred.account_number.clone();
        if !acct.is_empty() {
            let _ = self.pick_dropdown(
                ctx,
                &By::xpath(
                    "//div[contains(@class,'oj-select-choice') \
                     and @aria-label='Select Account Number']",
                ),
                &By::xpath(format!(
                    "//ul[contains(@id,'oj-listbox-results') and @role='listbox']\
                     //li//div[contains(normalize-space(.),'{acct}')]"
                )),
            );
        }

        self.pick_dropdown(
            ctx,
            &By::xpath(
                "//div[contains(@class,'account-statement-left__selectPeriod')]\
                 //div[contains(@class,'oj-select-choice')]",
            ),
            &By::xpath(
                "//ul[contains(@id,'selectPeriod') and contains(@id,'-list')]\
                 //li//div[normalize-space(text())='Date Range']",
            ),
        )?;

        let window = ctx.date_window(self.kind().cutover_hour());
        let (from, to) = window.as_dmy();
        let from_input = ctx.session.find(&By::id("fromDate|input"), WAIT)?;
        helpers::fill(ctx, &from_input, &from)?;
        let to_input = ctx.session.find(&By::id("todate|input"), WAIT)?;
        helpers::fill(ctx, &to_input, &to)?;

        let apply = ctx
            .session
            .find(&helpers::by_span_button("Apply Filter"), WAIT)?;
        ctx.session.click_robust(&apply)?;
        std::thread::sleep(Duration::from_secs(3));

        self.pick_dropdown(
            ctx,
            &By::id("ojChoiceId_myMenu"),
            &By::xpath("//ul[@id='myMenu-list']//li//div[normalize-space(text())='CSV']"),
        )?;

        helpers::download_after(ctx, &[".csv"], |ctx| {
            let download = ctx
                .session
                .find(&helpers::by_span_button("Download"), WAIT)?;
            ctx.session.click_robust(&download)
        })
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        let summary = ctx
            .session
            .find(&By::xpath("//a[@aria-label='Account Summary']"), WAIT)?;
        ctx.session.click_robust(&summary)?;

        let acct = ctx.cred.account_number.clone();
        if acct.is_empty() {
            return Err(AutobotError::Portal("missing account_number".into()));
        }
        let cell = ctx.session.find(
            &By::xpath(format!(
                "//table[contains(@id,'DDSummaryTable')]\
                 //tr[.//span[normalize-space(text())='{acct}']]\
                 //td[contains(@class,'amount')]"
            )),
            WAIT,
        )?;
        ctx.session.text_of(&cell)
    }
}
