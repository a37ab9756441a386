//! # Pipeline Coordination
//!
//! The two primitives that tie the long-running tasks together:
//!
//! - **`doorbell`**: a bounded queue of content-free signals. The store rings
//!   it after every insert, the enrichment worker waits on it. Ringing never
//!   blocks; a full queue simply drops the ring because the worker always
//!   re-derives its work from the store.
//! - **`shutdown`**: the coordinator that cancels the ingest listener, closes
//!   the doorbell and stops the HTTP server, in that order, exactly once.

pub mod doorbell;
pub mod shutdown;

pub use doorbell::{Doorbell, DoorbellReceiver, EnrichmentSignal, Ring};
pub use shutdown::ShutdownCoordinator;
