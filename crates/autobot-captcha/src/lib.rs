//! autobot-captcha — 2Captcha client.
//!
//! Submits the challenge image as base64, then polls the result endpoint
//! every 5 seconds for up to 30 attempts. An empty API key disables
//! auto-solving entirely; the workers then fall back to the manual
//! chat-supplied flow.

use std::time::Duration;

use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, warn};

use autobot_core::AutobotError;

const SUBMIT_URL: &str = "http://2captcha.com/in.php";
const RESULT_URL: &str = "http://2captcha.com/res.php";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const POLL_ATTEMPTS: u32 = 30;

/// Knobs for one solve request.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolveOptions {
    pub min_len: Option<u32>,
    pub max_len: Option<u32>,
    /// Ask the service to preserve letter case.
    pub regsense: bool,
}

impl SolveOptions {
    /// The common case: case-sensitive, no length hint.
    pub fn case_sensitive() -> Self {
        SolveOptions {
            regsense: true,
            ..Default::default()
        }
    }

    pub fn exact_len(len: u32) -> Self {
        SolveOptions {
            min_len: Some(len),
            max_len: Some(len),
            regsense: true,
        }
    }
}

/// 2Captcha API client. Cheap to clone behind an `Arc`.
pub struct TwoCaptcha {
    key: String,
    http: reqwest::blocking::Client,
}

impl TwoCaptcha {
    pub fn new(api_key: impl Into<String>) -> Self {
        TwoCaptcha {
            key: api_key.into(),
            http: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// True when a key is configured (auto-solve available).
    pub fn enabled(&self) -> bool {
        !self.key.trim().is_empty()
    }

    /// Solve an image challenge. Returns `Ok(None)` when the service could
    /// not produce a solution (callers then fall back to the manual flow);
    /// transport errors surface as `CaptchaService`.
    pub fn solve(
        &self,
        image: &[u8],
        opts: SolveOptions,
    ) -> Result<Option<(String, String)>, AutobotError> {
        if !self.enabled() {
            return Ok(None);
        }

        let body = base64::engine::general_purpose::STANDARD.encode(image);
        let mut form = vec![
            ("method".to_string(), "base64".to_string()),
            ("key".to_string(), self.key.clone()),
            ("body".to_string(), body),
            ("json".to_string(), "1".to_string()),
        ];
        if opts.regsense {
            form.push(("regsense".into(), "1".into()));
        }
        if let Some(min) = opts.min_len {
            form.push(("min_len".into(), min.to_string()));
        }
        if let Some(max) = opts.max_len {
            form.push(("max_len".into(), max.to_string()));
        }

        let submitted: Value = self
            .http
            .post(SUBMIT_URL)
            .form(&form)
            .send()
            .map_err(|e| AutobotError::CaptchaService(e.to_string()))?
            .json()
            .map_err(|e| AutobotError::CaptchaService(e.to_string()))?;

        if submitted["status"].as_i64() != Some(1) {
            debug!(response = %submitted, "captcha submit rejected");
            return Ok(None);
        }
        let ticket = submitted["request"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        // Poll for the solution.
        for _ in 0..POLL_ATTEMPTS {
            std::thread::sleep(POLL_INTERVAL);
            let result: Value = self
                .http
                .get(RESULT_URL)
                .query(&[
                    ("key", self.key.as_str()),
                    ("action", "get"),
                    ("id", ticket.as_str()),
                    ("json", "1"),
                ])
                .send()
                .map_err(|e| AutobotError::CaptchaService(e.to_string()))?
                .json()
                .map_err(|e| AutobotError::CaptchaService(e.to_string()))?;

            if result["status"].as_i64() == Some(1) {
                let text = result["request"].as_str().unwrap_or_default().to_string();
                return Ok(Some((text, ticket)));
            }
            if result["request"].as_str() != Some("CAPCHA_NOT_READY") {
                debug!(response = %result, "captcha poll aborted");
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Tell the service a solution was wrong so the ticket is refunded.
    /// Best-effort; failures are only logged.
    pub fn report_bad(&self, ticket: &str) {
        if !self.enabled() {
            return;
        }
        let result = self
            .http
            .get(RESULT_URL)
            .query(&[
                ("key", self.key.as_str()),
                ("action", "reportbad"),
                ("id", ticket),
            ])
            .timeout(Duration::from_secs(10))
            .send();
        if let Err(e) = result {
            warn!(ticket, error = %e, "reportbad failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_disables_auto_solve() {
        let solver = TwoCaptcha::new("");
        assert!(!solver.enabled());
        // No network call happens for a disabled solver.
        assert!(solver.solve(b"png", SolveOptions::default()).unwrap().is_none());
    }

    #[test]
    fn exact_len_sets_both_bounds() {
        let opts = SolveOptions::exact_len(6);
        assert_eq!(opts.min_len, Some(6));
        assert_eq!(opts.max_len, Some(6));
        assert!(opts.regsense);
    }
}
