//! Pagetrail - client-side behavioural telemetry collector
//!
//! Pagetrail records what a visitor does on a website (page entries and
//! exits, clicks, searches, scroll depth, session boundaries), buffers the
//! actions durably across page loads, and ships them to a collection endpoint
//! when a page or session ends.
//!
//! ## Modules
//!
//! - **Session engine**: [`session::SessionStateMachine`] driven by typed
//!   [`events::CollectorEvent`]s, with idle detection in [`inactivity`]
//! - **Buffering**: the durable [`queue::ActionQueue`] and its versioned
//!   storage [`schema`]
//! - **Delivery**: payload encoding and transport selection in [`delivery`]
//! - **Host seams**: the capability traits in [`host`], implemented in memory
//!   by [`sim::SimulatedBrowser`]

pub mod classifier;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod geometry;
pub mod host;
pub mod identity;
pub mod inactivity;
pub mod queue;
pub mod schema;
pub mod session;
pub mod sim;
pub mod target;
pub mod types;
pub mod urls;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{Classifier, RuleClassifier};
pub use config::CollectorConfig;
pub use error::CollectorError;
pub use events::CollectorEvent;
pub use host::Host;
pub use session::{CloseReason, FlushOutcome, InitOutcome, SessionStateMachine};
pub use sim::{replay, SimulatedBrowser};
pub use types::{Action, ActionType, PageBucket, ProtocolVariant, SessionState};

// Schema exports
pub use schema::{StoredQueue, STORED_QUEUE_VERSION};

/// Library version
pub const PAGETRAIL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collector name reported by the CLI and C ABI
pub const COLLECTOR_NAME: &str = "pagetrail";
