//! Console lifecycle: start, stop and monitoring status.
//!
//! `start` blocks the calling thread while a reader thread pulls records from
//! the input source. The calling thread dispatches each record in arrival
//! order, so records trigger dispatch strictly in stream order while their
//! callbacks run unordered on their own threads.
//!
//! A read that blocks forever (no data, no close, no read timeout) keeps the
//! reader thread parked. `stop` still hands control back to the `start`
//! caller; the reader thread hands the source back, along with any record it
//! read after the stop, once that read returns.

use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, SendError, Sender};

use crate::error::{ConsoleError, ConsoleResult};
use crate::record::Record;

use super::dispatcher::{DispatchStats, Dispatcher};
use super::matcher::Matcher;
use super::reader::{
    drain_undelivered, lock_slot, reader_loop, Input, ReaderMsg, ReaderRun, RecordSource,
    SourceSlot, SourceState,
};
use super::triggers::{TriggerId, TriggerTable};

/// Console tuning knobs.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Record delimiter byte.
    pub delimiter: u8,
    /// Records the reader may queue ahead of dispatch.
    pub record_queue_capacity: usize,
    /// Prefix for reader and callback thread names.
    pub thread_name_prefix: String,
    /// Stack size for the reader thread; `None` keeps the platform default.
    pub reader_stack_size: Option<usize>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            delimiter: b'\n',
            record_queue_capacity: 1024,
            thread_name_prefix: "linewatch".to_string(),
            reader_stack_size: None,
        }
    }
}

/// How a run's monitoring loop ended.
enum RunEnd {
    /// The reader reported end-of-input or a read failure.
    Finished(ConsoleResult<()>),
    /// `stop` was requested first.
    Stopped,
}

/// Line-oriented input dispatcher.
///
/// Register exact or pattern triggers at any time, then call [`Console::start`]
/// to consume the input source until end-of-input, a read error, or
/// [`Console::stop`].
pub struct Console {
    cfg: ConsoleConfig,
    dispatcher: Dispatcher,
    source: SourceSlot,
    delimiter: Arc<AtomicU8>,
    running: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    next_seq: AtomicU64,
}

impl Console {
    /// Console over standard input with the default configuration.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(io::stdin()))
    }

    /// Console over `source` with the default configuration.
    #[must_use]
    pub fn new(source: impl RecordSource) -> Self {
        Self::with_config(source, ConsoleConfig::default())
    }

    /// Console over `source` with an explicit configuration.
    #[must_use]
    pub fn with_config(source: impl RecordSource, cfg: ConsoleConfig) -> Self {
        let triggers = Arc::new(TriggerTable::new());
        let source: Box<dyn RecordSource> = Box::new(source);
        Self {
            dispatcher: Dispatcher::new(triggers, &cfg.thread_name_prefix),
            source: Arc::new(Mutex::new(SourceState::Ready(Input::new(source)))),
            delimiter: Arc::new(AtomicU8::new(cfg.delimiter)),
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            cfg,
        }
    }

    /// Run `callback` for every record equal to `trigger`.
    pub fn register_exact<F>(&self, trigger: impl Into<String>, callback: F) -> TriggerId
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.triggers().register_exact(trigger, Arc::new(callback))
    }

    /// Run `callback` for every record `matcher` accepts.
    pub fn register_pattern<M, F>(&self, matcher: M, callback: F) -> TriggerId
    where
        M: Matcher,
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.triggers().register_pattern(Arc::new(matcher), Arc::new(callback))
    }

    /// Compile `pattern` as a regex and register it.
    pub fn register_regex<F>(&self, pattern: &str, callback: F) -> ConsoleResult<TriggerId>
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.triggers().register_regex(pattern, Arc::new(callback))
    }

    /// Remove one registration. Returns false if `id` is unknown.
    pub fn unregister(&self, id: TriggerId) -> bool {
        self.triggers().unregister(id)
    }

    /// The underlying trigger table.
    #[must_use]
    pub fn triggers(&self) -> &Arc<TriggerTable> {
        self.dispatcher.triggers()
    }

    /// Dispatch `text` as if it had been read from the input.
    pub fn dispatch(&self, text: impl Into<String>) -> usize {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.dispatch(&Record::new(seq, text))
    }

    /// Whether a run is active. Never blocks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the delimiter used from the next read on.
    pub fn set_delimiter(&self, delimiter: u8) {
        self.delimiter.store(delimiter, Ordering::Release);
    }

    /// The delimiter the next read will use.
    #[must_use]
    pub fn delimiter(&self) -> u8 {
        self.delimiter.load(Ordering::Acquire)
    }

    /// The configuration this console was built with.
    #[must_use]
    pub fn config(&self) -> &ConsoleConfig {
        &self.cfg
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Consume the input source, dispatching every record, until end-of-input,
    /// a read error or [`Console::stop`].
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if another `start` is active, `SourceClosed` if an
    /// earlier run reached end-of-input or failed, `SourceBusy` if the reader
    /// of a stopped run is still blocked in a read, `Read` on a read failure,
    /// `Spawn` if the reader thread could not be started. Clean end-of-input
    /// returns `Ok(())`.
    ///
    /// Records a stopped run had already read are dispatched first, in order.
    pub fn start(&self) -> ConsoleResult<()> {
        let stop_rx = {
            // `stop` takes this lock too, so it sees either no run or this run's sender.
            let mut stop_slot = self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner);
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(ConsoleError::AlreadyRunning);
            }
            let (stop_tx, stop_rx) = bounded::<()>(1);
            *stop_slot = Some(stop_tx);
            stop_rx
        };

        let result = self.run(&stop_rx);

        *self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.running.store(false, Ordering::Release);
        match &result {
            Ok(()) => tracing::debug!("console stopped"),
            Err(e) => tracing::warn!(error = %e, "console stopped on error"),
        }
        result
    }

    fn run(&self, stop_rx: &Receiver<()>) -> ConsoleResult<()> {
        let mut input = self.take_input()?;

        // Records a stopped run read but never dispatched go first.
        while !input.backlog.is_empty() {
            if stop_rx.try_recv().is_ok() {
                tracing::debug!(left = input.backlog.len(), "stop requested during replay");
                *lock_slot(&self.source) = SourceState::Ready(input);
                return Ok(());
            }
            if let Some(bytes) = input.backlog.pop_front() {
                self.dispatch_bytes(&bytes);
            }
        }

        let (record_tx, record_rx) = bounded::<ReaderMsg>(self.cfg.record_queue_capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let run = ReaderRun {
            input,
            slot: Arc::clone(&self.source),
            delimiter: Arc::clone(&self.delimiter),
            cancelled: Arc::clone(&cancelled),
            tx: record_tx,
            rx: record_rx.clone(),
        };
        self.spawn_reader(run)?;

        tracing::debug!(delimiter = self.delimiter(), "console monitoring");
        match self.monitor(&record_rx, stop_rx) {
            RunEnd::Finished(result) => {
                *lock_slot(&self.source) = SourceState::Closed;
                result
            }
            RunEnd::Stopped => {
                cancelled.store(true, Ordering::Release);
                // If the reader already let go, it could not see the cancel.
                if let SourceState::Ready(input) = &mut *lock_slot(&self.source) {
                    drain_undelivered(&record_rx, &mut input.backlog);
                }
                Ok(())
            }
        }
    }

    fn take_input(&self) -> ConsoleResult<Input> {
        let mut state = lock_slot(&self.source);
        match std::mem::replace(&mut *state, SourceState::Busy) {
            SourceState::Ready(input) => Ok(input),
            SourceState::Busy => Err(ConsoleError::SourceBusy),
            SourceState::Closed => {
                *state = SourceState::Closed;
                Err(ConsoleError::SourceClosed)
            }
        }
    }

    /// Start the reader thread. On failure the input goes back into the slot.
    fn spawn_reader(&self, run: ReaderRun) -> ConsoleResult<()> {
        let (handoff_tx, handoff_rx) = bounded::<ReaderRun>(1);
        let mut builder =
            thread::Builder::new().name(format!("{}-reader", self.cfg.thread_name_prefix));
        if let Some(size) = self.cfg.reader_stack_size {
            builder = builder.stack_size(size);
        }

        // Detached: a reader parked on a blocking read must not hold up `start`.
        let spawned = builder.spawn(move || {
            if let Ok(run) = handoff_rx.recv() {
                reader_loop(run);
            }
        });

        let failure = match spawned {
            Ok(_reader) => match handoff_tx.send(run) {
                Ok(()) => return Ok(()),
                Err(SendError(run)) => (
                    run,
                    io::Error::other("reader thread exited before taking its input"),
                ),
            },
            Err(e) => (run, e),
        };
        let (run, source) = failure;
        *lock_slot(&self.source) = SourceState::Ready(run.input);
        Err(ConsoleError::Spawn {
            what: "reader",
            source,
        })
    }

    fn dispatch_bytes(&self, bytes: &[u8]) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.dispatch(&Record::from_bytes(seq, bytes));
    }

    fn monitor(&self, records: &Receiver<ReaderMsg>, stop: &Receiver<()>) -> RunEnd {
        loop {
            let outcome = select! {
                recv(records) -> msg => match msg {
                    Ok(ReaderMsg::Record(bytes)) => {
                        self.dispatch_bytes(&bytes);
                        None
                    }
                    Ok(ReaderMsg::Eof) => Some(RunEnd::Finished(Ok(()))),
                    Ok(ReaderMsg::Failed(e)) => Some(RunEnd::Finished(Err(ConsoleError::Read(e)))),
                    Err(_) => Some(RunEnd::Finished(Err(ConsoleError::Read(io::Error::other(
                        "reader thread exited unexpectedly",
                    ))))),
                },
                recv(stop) -> _ => {
                    tracing::debug!("stop requested");
                    Some(RunEnd::Stopped)
                }
            };

            if let Some(end) = outcome {
                return end;
            }
        }
    }

    /// Request termination of the active run. Idempotent, and a no-op when
    /// nothing is running.
    ///
    /// Callbacks already launched keep running.
    pub fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop_tx {
            let _ = tx.try_send(());
        }
    }

    /// Run [`Console::start`] on a background thread.
    ///
    /// # Errors
    ///
    /// `Spawn` if the monitoring thread could not be started.
    pub fn spawn(self: &Arc<Self>) -> ConsoleResult<JoinHandle<ConsoleResult<()>>> {
        let console = Arc::clone(self);
        thread::Builder::new()
            .name(format!("{}-monitor", self.cfg.thread_name_prefix))
            .spawn(move || console.start())
            .map_err(|source| ConsoleError::Spawn {
                what: "monitor",
                source,
            })
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("cfg", &self.cfg)
            .field("running", &self.is_running())
            .field("delimiter", &self.delimiter())
            .field("triggers", self.triggers())
            .finish_non_exhaustive()
    }
}
