//! Update wire format.
//!
//! A client connects to the ingestion socket, writes one JSON payload and
//! closes (or half-closes) its end. The payload is either a single update
//! object or an array of them:
//!
//! ```json
//! {"name": "jobs_total", "label_values": ["mailer"], "method": "inc"}
//! ```
//!
//! Decoding never panics; malformed bytes surface as `TallyError::Transport`.

pub mod update;

pub use update::{decode_payload, payload_complete, MetricUpdate};
