//! Console subsystem: trigger registration, the read/dispatch loop and its
//! lifecycle.
//!
//! Records flow from a [`RecordSource`] through the reader thread to the
//! thread blocked in [`Console::start`], which looks each record up in the
//! [`TriggerTable`] and launches every matching callback on its own thread.

/// Lifecycle controller and configuration.
pub mod controller;
/// Callback launching and failure isolation.
pub mod dispatcher;
/// Pattern matchers for pattern triggers.
pub mod matcher;
/// Record sources and the reader worker.
pub mod reader;
/// Trigger table.
pub mod triggers;

pub use controller::{Console, ConsoleConfig};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use matcher::{Matcher, Prefix};
pub use reader::RecordSource;
pub use triggers::{Callback, TriggerId, TriggerTable};
