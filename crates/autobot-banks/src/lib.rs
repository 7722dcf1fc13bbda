//! autobot-banks — the concrete bank adapters.
//!
//! One module per portal, each realizing the Worker Capability contract
//! (`login` / `fetch_statement` / `read_balance`, optionally
//! `detect_logged_out`). Adapters hold navigation only; retrying,
//! screenshots and the upload protocol belong to the worker runtime.

use autobot_core::BankKind;
use autobot_worker::{AdapterFactory, BankAdapter};

mod canara;
mod helpers;
mod idbi;
mod idfc;
mod iob;
mod kgb;
mod tmb;

pub use canara::CanaraAdapter;
pub use idbi::IdbiAdapter;
pub use idfc::IdfcAdapter;
pub use iob::IobAdapter;
pub use kgb::KgbAdapter;
pub use tmb::TmbAdapter;

/// Adapter dispatch over the closed bank set. The IOB adapter serves both the
/// retail and corporate flavors, picking per credential at login time.
pub fn adapter_for(kind: BankKind) -> Box<dyn BankAdapter> {
    match kind {
        BankKind::Tmb => Box::new(TmbAdapter::new()),
        BankKind::Iob => Box::new(IobAdapter::new()),
        BankKind::Kgb => Box::new(KgbAdapter::new()),
        BankKind::Idbi => Box::new(IdbiAdapter::new()),
        BankKind::Idfc => Box::new(IdfcAdapter::new()),
        BankKind::Canara => Box::new(CanaraAdapter::new()),
    }
}

/// The production `AdapterFactory`: real portal adapters.
pub struct PortalAdapters;

impl AdapterFactory for PortalAdapters {
    fn make(&self, kind: BankKind) -> Box<dyn BankAdapter> {
        adapter_for(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_every_bank() {
        for kind in [
            BankKind::Tmb,
            BankKind::Iob,
            BankKind::Kgb,
            BankKind::Idbi,
            BankKind::Idfc,
            BankKind::Canara,
        ] {
            let adapter = adapter_for(kind);
            assert_eq!(adapter.kind(), kind);
        }
    }
}
