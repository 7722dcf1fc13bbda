use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AutobotError;
use crate::label;

// ── Credential ───────────────────────────────────────────────────────────────

/// One credential row, as stored in the CSV plus the derived bank label.
///
/// A worker keeps a live copy behind its own mutex; `EditCredential` patches
/// individual fields in place and the change takes full effect on the next
/// login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub alias: String,
    pub login_id: String,
    pub user_id: String,
    pub username: String,
    pub password: String,
    pub account_number: String,
    pub bank_label: String,
}

impl Credential {
    /// Canonical authentication id: the first non-empty of
    /// username / login_id / user_id.
    pub fn auth_id(&self) -> &str {
        for v in [&self.username, &self.login_id, &self.user_id] {
            let v = v.trim();
            if !v.is_empty() {
                return v;
            }
        }
        ""
    }

    /// Validate the row invariants: auth id, password and account number must
    /// all be present.
    pub fn validate(&self) -> Result<(), AutobotError> {
        if self.auth_id().is_empty() {
            return Err(AutobotError::MissingCredentialField {
                alias: self.alias.clone(),
                field: "username/login_id/user_id".into(),
            });
        }
        if self.password.trim().is_empty() {
            return Err(AutobotError::MissingCredentialField {
                alias: self.alias.clone(),
                field: "password".into(),
            });
        }
        if self.account_number.trim().is_empty() {
            return Err(AutobotError::MissingCredentialField {
                alias: self.alias.clone(),
                field: "account_number".into(),
            });
        }
        Ok(())
    }

    /// Account number rendered as `***` + last four digits for listings.
    pub fn masked_account(&self) -> String {
        let digits: String = self
            .account_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let tail = if digits.len() >= 4 {
            &digits[digits.len() - 4..]
        } else if !self.account_number.is_empty() {
            let n = self.account_number.len();
            &self.account_number[n.saturating_sub(4)..]
        } else {
            ""
        };
        if tail.is_empty() {
            "***".into()
        } else {
            format!("***{tail}")
        }
    }

    /// Build a row from its CSV fields, deriving the bank label from the
    /// alias suffix.
    pub fn from_fields(
        alias: &str,
        login_id: &str,
        user_id: &str,
        username: &str,
        password: &str,
        account_number: &str,
    ) -> Self {
        Credential {
            alias: alias.trim().to_string(),
            login_id: login_id.trim().to_string(),
            user_id: user_id.trim().to_string(),
            username: username.trim().to_string(),
            password: password.trim().to_string(),
            account_number: account_number.trim().to_string(),
            bank_label: label::infer_bank_label(alias),
        }
    }
}

// ── CredentialField ──────────────────────────────────────────────────────────

/// The subset of columns `EditCredential` may change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialField {
    LoginId,
    UserId,
    Password,
    AccountNumber,
}

impl CredentialField {
    pub fn column(&self) -> &'static str {
        match self {
            CredentialField::LoginId => "login_id",
            CredentialField::UserId => "user_id",
            CredentialField::Password => "password",
            CredentialField::AccountNumber => "account_number",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CredentialField::LoginId => "Login ID",
            CredentialField::UserId => "User ID",
            CredentialField::Password => "Password",
            CredentialField::AccountNumber => "Account number",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "login" | "login_id" => Some(CredentialField::LoginId),
            "user" | "user_id" => Some(CredentialField::UserId),
            "password" => Some(CredentialField::Password),
            "account" | "account_number" => Some(CredentialField::AccountNumber),
            _ => None,
        }
    }

    pub fn apply(&self, cred: &mut Credential, value: &str) {
        let value = value.trim().to_string();
        match self {
            CredentialField::LoginId => cred.login_id = value,
            CredentialField::UserId => cred.user_id = value,
            CredentialField::Password => cred.password = value,
            CredentialField::AccountNumber => cred.account_number = value,
        }
    }
}

// ── WorkerState ──────────────────────────────────────────────────────────────

/// Lifecycle phase of one worker. `Stopped` is terminal; everything else
/// counts as alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    LoggingIn,
    Steady,
    Recovering,
    Stopped,
}

impl WorkerState {
    pub fn is_alive(&self) -> bool {
        !matches!(self, WorkerState::Stopped)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Init => "init",
            WorkerState::LoggingIn => "logging-in",
            WorkerState::Steady => "steady",
            WorkerState::Recovering => "recovering",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(alias: &str) -> Credential {
        Credential::from_fields(alias, "", "", "user", "pw", "1234567890")
    }

    #[test]
    fn auth_id_prefers_username_then_login_then_user() {
        let mut c = Credential::from_fields("a_tmb", "lid", "uid", "uname", "pw", "1");
        assert_eq!(c.auth_id(), "uname");
        c.username.clear();
        assert_eq!(c.auth_id(), "lid");
        c.login_id.clear();
        assert_eq!(c.auth_id(), "uid");
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let mut c = cred("acme_tmb");
        assert!(c.validate().is_ok());
        c.password = "  ".into();
        assert!(matches!(
            c.validate(),
            Err(AutobotError::MissingCredentialField { .. })
        ));
    }

    #[test]
    fn masked_account_keeps_last_four_digits() {
        let c = cred("acme_tmb");
        assert_eq!(c.masked_account(), "***7890");
        let short = Credential::from_fields("s_tmb", "", "", "u", "p", "42");
        assert_eq!(short.masked_account(), "***42");
    }

    #[test]
    fn stopped_is_the_only_dead_state() {
        assert!(WorkerState::Init.is_alive());
        assert!(WorkerState::LoggingIn.is_alive());
        assert!(WorkerState::Steady.is_alive());
        assert!(WorkerState::Recovering.is_alive());
        assert!(!WorkerState::Stopped.is_alive());
    }
}
