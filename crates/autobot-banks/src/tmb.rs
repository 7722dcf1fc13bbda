//! Tamilnad Mercantile Bank.
//!
//! Login is auth id + password + image CAPTCHA; the statement search page
//! defaults to the current day, so no date inputs are touched. Statements
//! come down as XLS.

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::By;
use autobot_captcha::SolveOptions;
use autobot_core::{AutobotError, BankKind};
use autobot_worker::{AdapterCtx, BankAdapter};

use crate::helpers::{self, WAIT};

const LOGIN_URL: &str = "https://www.tmbnet.in/";

#[derive(Default)]
pub struct TmbAdapter {
    captcha_ticket: Option<String>,
}

impl TmbAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BankAdapter for TmbAdapter {
    fn kind(&self) -> BankKind {
        BankKind::Tmb
    }

    fn login(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<(), AutobotError> {
        ctx.session.navigate(LOGIN_URL)?;
        let entry = ctx.session.find(&By::link_text("Net Banking Login"), WAIT)?;
        ctx.session.click_robust(&entry)?;

        // The landing page has a couple of variants; both are optional.
        for by in [
            By::css("button.login-button.btn-tmb-primary"),
            By::xpath("//button[contains(., 'Continue to Login')]"),
        ] {
            if let Ok(btn) = ctx.session.find(&by, Duration::from_secs(5)) {
                let _ = ctx.session.click_robust(&btn);
                break;
            }
        }

        let user = ctx
            .session
            .find(&By::name("AuthenticationFG.USER_PRINCIPAL"), WAIT)?;
        ctx.session.type_text(&user, ctx.cred.auth_id())?;
        let password = ctx.cred.password.clone();
        let pwd = ctx
            .session
            .find(&By::name("AuthenticationFG.ACCESS_CODE"), WAIT)?;
        ctx.session.type_text(&pwd, &password)?;

        let img = ctx.session.find(&By::id("IMAGECAPTCHA"), WAIT)?;
        let png = ctx.session.screenshot_element(&img)?;
        let (code, ticket) = ctx.solve_captcha(&png, SolveOptions::case_sensitive())?;
        self.captcha_ticket = ticket;

        let code_input = ctx
            .session
            .find(&By::name("AuthenticationFG.VERIFICATION_CODE"), WAIT)?;
        ctx.session.type_text(&code_input, &code)?;
        let submit = ctx.session.find(&By::id("VALIDATE_CREDENTIALS"), WAIT)?;
        ctx.session.click(&submit)?;

        helpers::find_any(
            ctx,
            &[
                By::id("Account_Summary"),
                By::xpath("//*[contains(., 'My Accounts')]"),
            ],
            WAIT,
        )?;
        Ok(())
    }

    fn fetch_statement(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<PathBuf, AutobotError> {
        let stmt = ctx
            .session
            .find(&By::link_text("Account Statement"), WAIT)?;
        ctx.session.click_robust(&stmt)?;
        helpers::find_any(
            ctx,
            &[By::xpath("//*[contains(.,'My Transactions')]")],
            WAIT,
        )?;

        let search = ctx.session.find(&By::id("SEARCH"), WAIT)?;
        ctx.session.click_robust(&search)?;

        // Page count is informational only.
        if let Ok(pages) = ctx.session.find(
            &By::xpath("//*[contains(text(),'Page') and contains(text(),'of')]"),
            Duration::from_secs(5),
        ) {
            if let Ok(text) = ctx.session.text_of(&pages) {
                ctx.info(format!("Statement pagination: {text}"));
            }
        }

        let xls = ctx.session.find(
            &By::xpath(
                "//select[contains(@id,'.OUTFORMAT')]/option[normalize-space(text())='XLS']",
            ),
            WAIT,
        )?;
        ctx.session.click(&xls)?;

        helpers::download_after(ctx, &[".xls"], |ctx| {
            let (_, btn) = helpers::find_any(
                ctx,
                &[
                    By::name("Action.CUSTOM_GENERATE_REPORTS"),
                    By::id("okButton"),
                    By::xpath("//input[@value='Download']"),
                ],
                WAIT,
            )?;
            ctx.session.click_robust(&btn)
        })
    }

    fn read_balance(&mut self, ctx: &mut AdapterCtx<'_>) -> Result<String, AutobotError> {
        let summary = ctx.session.find(&By::id("Account_Summary"), WAIT)?;
        ctx.session.click_robust(&summary)?;
        ctx.session
            .find(&By::xpath("//h1[contains(.,'My Accounts')]"), WAIT)?;

        let cell = ctx.session.find(
            &By::css("#SummaryList tr.listwhiterow td:nth-child(3)"),
            WAIT,
        )?;
        ctx.session.text_of(&cell)
    }
}
