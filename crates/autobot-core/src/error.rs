use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutobotError {
    // ── Credential store ─────────────────────────────────────────────────────
    #[error("unknown alias: {0}")]
    UnknownAlias(String),

    #[error("alias already exists: {0}")]
    DuplicateAlias(String),

    #[error("account number {account} already linked to alias '{existing_alias}'")]
    DuplicateAccountNumber {
        account: String,
        existing_alias: String,
    },

    #[error("credential row for '{alias}' is missing {field}")]
    MissingCredentialField { alias: String, field: String },

    #[error("credentials file is unusable: {0}")]
    CredStoreCorrupt(String),

    #[error("credentials store IO error: {0}")]
    CredStoreIo(#[from] std::io::Error),

    // ── Bank resolution ──────────────────────────────────────────────────────
    #[error("unsupported bank label: {0}")]
    UnsupportedBank(String),

    // ── Supervisor / registry ────────────────────────────────────────────────
    #[error("worker already running for alias: {0}")]
    AliasAlreadyRunning(String),

    #[error("no running worker for alias: {0}")]
    NotRunning(String),

    // ── Browser session ──────────────────────────────────────────────────────
    #[error("webdriver request failed: {0}")]
    Driver(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("could not open a fresh tab")]
    TabUnavailable,

    #[error("download did not complete: {0}")]
    DownloadTimeout(String),

    // ── Portal flow ──────────────────────────────────────────────────────────
    /// The portal rejected the CAPTCHA text. Carries the solver ticket so the
    /// runtime can report it bad before the next attempt.
    #[error("captcha rejected by portal")]
    CaptchaWrong { ticket: Option<String> },

    #[error("server-side logout detected")]
    LoggedOut,

    #[error("portal step failed: {0}")]
    Portal(String),

    // ── Statement sink ───────────────────────────────────────────────────────
    #[error("statement upload failed after {attempts} attempts: {reason}")]
    UploadFailed { attempts: u32, reason: String },

    // ── CAPTCHA resolver ─────────────────────────────────────────────────────
    #[error("captcha service error: {0}")]
    CaptchaService(String),

    // ── Worker lifecycle ─────────────────────────────────────────────────────
    #[error("worker stopped by request")]
    Cancelled,

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl AutobotError {
    /// True for errors that mean the bank session is gone rather than a step
    /// merely failing; the runtime reacts with a tab reset + re-login instead
    /// of burning an outer failure.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, AutobotError::LoggedOut)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AutobotError::Cancelled)
    }
}
