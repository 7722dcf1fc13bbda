//! Environment-driven application settings.

use std::path::PathBuf;

use tracing::{info, warn};

use autobot_core::constants::BALANCE_CHECK_INTERVAL_SECS;
use autobot_core::AutobotError;

#[derive(Clone, Debug)]
pub struct Settings {
    pub telegram_token: String,
    pub telegram_chat_id: i64,
    pub credentials_csv: PathBuf,
    pub two_captcha_key: String,
    pub autobank_upload_url: String,
    pub profile_root: PathBuf,
    pub webdriver_url: String,
    pub alert_group_ids: Vec<i64>,
    pub balance_check_interval: u64,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load settings from the environment. Missing required values abort
    /// startup with a `Configuration` error.
    pub fn from_env() -> Result<Settings, AutobotError> {
        let telegram_token = env("TELEGRAM_TOKEN").ok_or_else(|| {
            AutobotError::Configuration(
                "TELEGRAM_TOKEN is required; set it before starting the bot".into(),
            )
        })?;

        let chat_id_raw = env("TELEGRAM_CHAT_ID").ok_or_else(|| {
            AutobotError::Configuration(
                "TELEGRAM_CHAT_ID is required; set it before starting the bot".into(),
            )
        })?;
        let telegram_chat_id: i64 = chat_id_raw.trim().parse().map_err(|_| {
            AutobotError::Configuration(format!(
                "TELEGRAM_CHAT_ID must be an integer, got: {chat_id_raw:?}"
            ))
        })?;

        let two_captcha_key = env("TWO_CAPTCHA_API_KEY").unwrap_or_default();
        if two_captcha_key.is_empty() {
            warn!("TWO_CAPTCHA_API_KEY not set; CAPTCHA solving will require manual input");
        }

        let credentials_csv =
            PathBuf::from(env("CREDENTIALS_CSV").unwrap_or_else(|| "tmb_credentials.csv".into()));
        if !credentials_csv.exists() {
            warn!(
                path = %credentials_csv.display(),
                "credentials CSV not found; create it before running workers"
            );
        }

        let autobank_upload_url = env("AUTOBANK_UPLOAD_URL")
            .unwrap_or_else(|| "https://autobank.payatom.in/bankupload.php".into());

        let profile_root = env("PROFILE_ROOT").map(PathBuf::from).unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join("chrome-profiles")
        });

        let webdriver_url =
            env("WEBDRIVER_URL").unwrap_or_else(|| "http://127.0.0.1:9515".into());

        let alert_group_ids = match env("ALERT_GROUP_IDS") {
            Some(raw) => {
                let parsed: Result<Vec<i64>, _> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse)
                    .collect();
                match parsed {
                    Ok(ids) => {
                        info!(groups = ids.len(), "balance alerts enabled");
                        ids
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "invalid ALERT_GROUP_IDS (use comma-separated integers); \
                             balance alerts disabled"
                        );
                        Vec::new()
                    }
                }
            }
            None => {
                info!("ALERT_GROUP_IDS not set; balance alerts disabled");
                Vec::new()
            }
        };

        // Interval floor is enforced again by MonitorConfig; parse leniently.
        let balance_check_interval = env("BALANCE_CHECK_INTERVAL")
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("invalid BALANCE_CHECK_INTERVAL; using the default");
                    None
                }
            })
            .unwrap_or(BALANCE_CHECK_INTERVAL_SECS);

        info!(
            chat_id = telegram_chat_id,
            creds = %credentials_csv.display(),
            autobank = %autobank_upload_url,
            two_captcha = if two_captcha_key.is_empty() { "not configured" } else { "configured" },
            interval_secs = balance_check_interval,
            "settings loaded"
        );

        Ok(Settings {
            telegram_token,
            telegram_chat_id,
            credentials_csv,
            two_captcha_key,
            autobank_upload_url,
            profile_root,
            webdriver_url,
            alert_group_ids,
            balance_check_interval,
        })
    }
}
