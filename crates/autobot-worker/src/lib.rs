//! autobot-worker — the generic worker runtime.
//!
//! One worker = one OS thread driving one browser session through the shared
//! lifecycle:
//!
//! ```text
//!        spawn()
//! Init ─────────► LoggingIn
//!                    │ success
//!                    ▼
//!                Steady ──► (fetch → upload → read balance → sleep 60 s)
//!                    │
//!                    │ logged-out / too many failures
//!                    ▼
//!               Recovering ─► tab reset ─► LoggingIn
//!                    │
//!                    │ stop signal OR failure budget spent
//!                    ▼
//!                 Stopped
//! ```
//!
//! Retrying, screenshots, tab resets, the upload sub-protocol and
//! cancellation all live here; bank adapters contain portal navigation only
//! and never catch their own errors.

pub mod adapter;
pub mod runtime;
pub mod shared;

pub use adapter::{AdapterCtx, AdapterFactory, BankAdapter};
pub use runtime::{spawn_worker, WorkerConfig, WorkerHandle, WorkerTuning};
pub use shared::{StopSignal, WorkerShared};
