//! autobot-browser — the isolated browser session every worker owns.
//!
//! The `BrowserSession` trait is the seam between the worker runtime / bank
//! adapters and the actual driver. Production uses `WebDriverSession`, a
//! small client for the W3C WebDriver wire protocol speaking to a local
//! chromedriver; the test suites use `fake::FakeSession`.

pub mod download;
pub mod fake;
pub mod session;
pub mod webdriver;

pub use session::{BrowserSession, By, ElementHandle, SessionFactory, SessionInterrupt};
pub use webdriver::{WebDriverFactory, WebDriverSession};
