//! relaywatch ingestion components.
//!
//! # Modules
//!
//! - [`relay`] - Connection supervisor, per-relay connection tasks, wire frames
//! - [`pipeline`] - Validation, dedupe window, buffered transactional flush
//! - [`discovery`] - Relay discovery from relay-list records
//! - [`seeds`] - Seed relay file loading
//! - [`shutdown`] - Ordered shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Supervisor    │  one task per relay, reconnect, cap
//! └────────┬────────┘
//!          │ EVENT frames
//!          ▼
//! ┌─────────────────┐
//! │    Pipeline     │  validate → dedupe → buffer → flush
//! └────────┬────────┘
//!          │ one transaction per batch
//!          ▼
//! ┌─────────────────┐       relay lists      ┌─────────────────┐
//! │      Store      │ ─────────────────────► │     Crawler     │
//! └─────────────────┘ ◄───── new relays ──── └─────────────────┘
//! ```

pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod seeds;
pub mod shutdown;

pub use error::{Error, Result};

pub use discovery::{Crawler, CrawlerConfig};
pub use pipeline::{IngestOutcome, Pipeline, PipelineConfig, PipelineStats};
pub use relay::{Supervisor, SupervisorConfig};
pub use shutdown::{ShutdownReport, graceful_shutdown};
