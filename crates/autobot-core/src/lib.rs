//! autobot-core — shared types for the statement-scraping supervisor.
//!
//! Everything the member crates agree on lives here: the credential model,
//! bank identification, worker states, the workspace error enum, the
//! protocol constants, and the statement date-window policy.

pub mod constants;
pub mod datewindow;
pub mod error;
pub mod label;
pub mod types;

pub use error::AutobotError;
pub use label::BankKind;
pub use types::{Credential, CredentialField, WorkerState};
