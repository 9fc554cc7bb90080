//! # linewatch - line-oriented input dispatcher
//!
//! linewatch reads delimited records from a byte stream and invokes every
//! registered callback whose trigger matches the record. Independent parts of
//! a program subscribe to textual events (console commands, for instance)
//! without polling and without a central router.
//!
//! ## Core Concepts
//!
//! - **Record**: one delimiter-terminated unit of input, delimiter stripped
//! - **Trigger**: an exact string or a pattern, owning an ordered list of callbacks
//! - **Dispatch**: matching a record against all triggers and launching the callbacks
//! - **Monitoring**: the state in which the console consumes input
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use linewatch::{Console, Record};
//!
//! let console = Arc::new(Console::stdin());
//!
//! console.register_exact("ping", |_rec: Record| println!("pong"));
//! console.register_regex(r"^say (.*)$", |rec: Record| println!("{rec}"))?;
//!
//! let stopper = Arc::clone(&console);
//! console.register_exact("quit", move |_rec: Record| stopper.stop());
//!
//! console.start()?;
//! # Ok::<(), linewatch::ConsoleError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod console;
pub mod error;
pub mod record;

// Re-export primary types at crate root for convenience
pub use console::{
    Callback, Console, ConsoleConfig, DispatchStats, Dispatcher, Matcher, Prefix, RecordSource,
    TriggerId, TriggerTable,
};
pub use error::{ConsoleError, ConsoleResult};
pub use record::Record;
