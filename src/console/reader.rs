//! Input side of the console: record sources and the reader worker.
//!
//! The reader owns the source for the duration of a run and forwards records
//! to the monitoring thread over a bounded channel. It never dispatches or
//! waits on callbacks itself.
//!
//! Nothing consumed from a source is lost across a stop: bytes of a record
//! cut short by a transient error stay in [`Input::partial`], and records
//! read but never dispatched go into [`Input::backlog`] for the next run.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

/// How often a reader blocked on a full queue rechecks for a stop request.
const SEND_POLL: Duration = Duration::from_millis(50);

/// A readable byte stream split into delimiter-terminated records.
pub trait RecordSource: Send + 'static {
    /// Read the next record into `buf`, delimiter stripped.
    ///
    /// `buf` may already hold the start of a record from an earlier call that
    /// failed part-way. Implementations append to it, and bytes consumed from
    /// the stream must stay in `buf` when an error is returned so the next
    /// call can finish the record.
    ///
    /// Returns `Ok(true)` when `buf` holds one complete record and `Ok(false)`
    /// at end-of-input. Bytes left at end-of-input without a trailing
    /// delimiter are not a record.
    fn read_record(&mut self, delimiter: u8, buf: &mut Vec<u8>) -> io::Result<bool>;
}

impl<R: BufRead + Send + 'static> RecordSource for R {
    fn read_record(&mut self, delimiter: u8, buf: &mut Vec<u8>) -> io::Result<bool> {
        // `read_until` leaves whatever it consumed in `buf` when it fails.
        let n = self.read_until(delimiter, buf)?;
        if n > 0 && buf.last() == Some(&delimiter) {
            buf.pop();
            return Ok(true);
        }
        if !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "discarding unterminated trailing input");
            buf.clear();
        }
        Ok(false)
    }
}

/// A source together with everything already consumed from it.
pub(crate) struct Input {
    source: Box<dyn RecordSource>,
    /// Start of a record whose read was interrupted.
    partial: Vec<u8>,
    /// Records read but not yet dispatched, oldest first.
    pub backlog: VecDeque<Vec<u8>>,
}

impl Input {
    pub fn new(source: Box<dyn RecordSource>) -> Self {
        Self {
            source,
            partial: Vec::new(),
            backlog: VecDeque::new(),
        }
    }
}

/// Who holds the input between runs.
pub(crate) enum SourceState {
    /// Available to the next `start`.
    Ready(Input),
    /// Owned by a reader thread that has not finished yet.
    Busy,
    /// End-of-input or a read error was reported; the source is gone.
    Closed,
}

pub(crate) type SourceSlot = Arc<Mutex<SourceState>>;

/// Nothing runs user code under the slot lock, so a poisoned lock still
/// guards a consistent state.
pub(crate) fn lock_slot(slot: &SourceSlot) -> MutexGuard<'_, SourceState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Messages from the reader to the monitoring thread.
#[derive(Debug)]
pub(crate) enum ReaderMsg {
    Record(Vec<u8>),
    Eof,
    Failed(io::Error),
}

impl ReaderMsg {
    fn into_record(self) -> Option<Vec<u8>> {
        match self {
            Self::Record(bytes) => Some(bytes),
            Self::Eof | Self::Failed(_) => None,
        }
    }
}

/// Append every record still queued in `rx` to `backlog`.
pub(crate) fn drain_undelivered(rx: &Receiver<ReaderMsg>, backlog: &mut VecDeque<Vec<u8>>) {
    backlog.extend(rx.try_iter().filter_map(ReaderMsg::into_record));
}

/// Shared state a reader worker needs for one run.
pub(crate) struct ReaderRun {
    pub input: Input,
    pub slot: SourceSlot,
    pub delimiter: Arc<AtomicU8>,
    pub cancelled: Arc<AtomicBool>,
    pub tx: Sender<ReaderMsg>,
    /// Lets the reader take back what the monitor never received.
    pub rx: Receiver<ReaderMsg>,
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Send `msg`, giving it back if the run is cancelled while the queue is full.
fn forward(
    tx: &Sender<ReaderMsg>,
    cancelled: &AtomicBool,
    mut msg: ReaderMsg,
) -> Result<(), ReaderMsg> {
    loop {
        match tx.send_timeout(msg, SEND_POLL) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(m)) if !cancelled.load(Ordering::Acquire) => msg = m,
            Err(SendTimeoutError::Timeout(m) | SendTimeoutError::Disconnected(m)) => return Err(m),
        }
    }
}

/// Reader worker body.
///
/// The input goes back into the slot whenever the reader finishes. If the run
/// was stopped, records the monitor never received (plus one read after the
/// stop) are moved into the backlog first. On end-of-input or a read error
/// the input is handed back before the terminal message is sent, so the
/// monitor that receives it can close the slot.
pub(crate) fn reader_loop(run: ReaderRun) {
    let ReaderRun {
        mut input,
        slot,
        delimiter,
        cancelled,
        tx,
        rx,
    } = run;

    loop {
        if cancelled.load(Ordering::Acquire) {
            break;
        }

        let delim = delimiter.load(Ordering::Acquire);
        match input.source.read_record(delim, &mut input.partial) {
            Ok(true) => {
                let bytes = std::mem::take(&mut input.partial);
                if let Err(msg) = forward(&tx, &cancelled, ReaderMsg::Record(bytes)) {
                    let mut state = lock_slot(&slot);
                    drain_undelivered(&rx, &mut input.backlog);
                    input.backlog.extend(msg.into_record());
                    *state = SourceState::Ready(input);
                    tracing::debug!("reader kept undelivered records for the next run");
                    return;
                }
            }
            Ok(false) => {
                finish(input, &slot, &cancelled, &rx, &tx, ReaderMsg::Eof);
                return;
            }
            Err(e) if is_transient(&e) => {
                tracing::trace!(error = %e, pending = input.partial.len(), "retrying read");
            }
            Err(e) => {
                finish(input, &slot, &cancelled, &rx, &tx, ReaderMsg::Failed(e));
                return;
            }
        }
    }

    let mut state = lock_slot(&slot);
    drain_undelivered(&rx, &mut input.backlog);
    *state = SourceState::Ready(input);
    tracing::debug!("reader released input source");
}

fn finish(
    mut input: Input,
    slot: &SourceSlot,
    cancelled: &AtomicBool,
    rx: &Receiver<ReaderMsg>,
    tx: &Sender<ReaderMsg>,
    msg: ReaderMsg,
) {
    {
        let mut state = lock_slot(slot);
        if cancelled.load(Ordering::Acquire) {
            // Nobody will hear the end of this run; the next one reads it again.
            drain_undelivered(rx, &mut input.backlog);
            *state = SourceState::Ready(input);
            return;
        }
        *state = SourceState::Ready(input);
    }
    if forward(tx, cancelled, msg).is_err() {
        tracing::debug!("run stopped before end of input was reported");
    }
}
