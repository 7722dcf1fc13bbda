//! autobot-supervisor — the registry that owns every live worker and the
//! operations the command surface calls.
//!
//! The registry is the single point of serialization for adding and removing
//! workers; each entry is otherwise owned by its worker thread. Process-wide
//! singletons travel through [`Deps`] instead of globals.

pub mod registry;
pub mod supervisor;

pub use registry::{Registry, WorkerView};
pub use supervisor::{ActiveEntry, Deps, StopOutcome, Supervisor};
