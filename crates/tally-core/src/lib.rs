//! tally core: metric definitions, the update wire format, and the error
//! surface shared by the daemon and its tooling.
//!
//! This crate carries no runtime, socket, or aggregation dependencies so the
//! spec loader and the update decoder can be reused by client-side tooling
//! (for example to lint a metric-definition file before deploying it).
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed spec
//! files and hostile payloads surface as `TallyError` values.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;
pub mod spec;

/// Shared result type.
pub use error::{ErrorClass, Result, TallyError};
pub use protocol::MetricUpdate;
pub use spec::{MetricKind, MetricSpec};
