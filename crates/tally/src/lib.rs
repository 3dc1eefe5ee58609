//! Top-level facade crate for tally.
//!
//! Re-exports core types and the daemon library so users can depend on a single crate.

pub mod core {
    pub use tally_core::*;
}

pub mod daemon {
    pub use tally_daemon::*;
}
