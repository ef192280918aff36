//! Relay connections.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Supervisor                        │
//! │  url → ConnectionHandle (one task each, capped)          │
//! │  reconcile loop: store.list_relay_urls() → ensure        │
//! └───────────┬──────────────────────────────────────────────┘
//!             │ mpsc Command (Subscribe / Close / Shutdown)
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  connection task: connect → REQ firehose → read frames   │
//! │  RelayFrame::Event → Pipeline::ingest                    │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod connection;
mod frame;
mod supervisor;

pub use connection::{
    Command, ConnectionHandle, ConnectionSettings, ConnectionState, FIREHOSE_SUBSCRIPTION,
    spawn_connection,
};
pub use frame::{ClientFrame, Filter, FrameError, RelayFrame};
pub use supervisor::{EnsureOutcome, Supervisor, SupervisorConfig};
