//! Record dispatcher.
//!
//! Matches a record against the trigger table and launches every matching
//! callback on its own thread. Dispatch never waits for a callback, and a
//! panicking callback is contained to its own invocation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use serde::Serialize;

use crate::record::Record;

use super::triggers::{Callback, TriggerTable};

#[derive(Debug, Default)]
struct Counters {
    records: AtomicU64,
    launched: AtomicU64,
    panicked: AtomicU64,
    spawn_failures: AtomicU64,
}

/// Point-in-time dispatch counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub records_dispatched: u64,
    pub callbacks_launched: u64,
    pub callbacks_panicked: u64,
    pub spawn_failures: u64,
}

/// Launches the callbacks matching each record.
#[derive(Debug)]
pub struct Dispatcher {
    triggers: Arc<TriggerTable>,
    thread_name: String,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Callback threads are named `<thread_name_prefix>-cb`.
    #[must_use]
    pub fn new(triggers: Arc<TriggerTable>, thread_name_prefix: &str) -> Self {
        Self {
            triggers,
            thread_name: format!("{thread_name_prefix}-cb"),
            counters: Arc::new(Counters::default()),
        }
    }

    /// The table this dispatcher reads from.
    #[must_use]
    pub fn triggers(&self) -> &Arc<TriggerTable> {
        &self.triggers
    }

    /// Launch every callback matching `record` and return how many were launched.
    ///
    /// Exact matches are launched before pattern matches. A callback that is
    /// registered both ways runs once per match source.
    pub fn dispatch(&self, record: &Record) -> usize {
        self.counters.records.fetch_add(1, Ordering::Relaxed);

        let callbacks = self.matching(record.text());
        if callbacks.is_empty() {
            tracing::trace!(seq = record.seq(), "no trigger matched");
            return 0;
        }

        let mut launched = 0;
        for callback in callbacks {
            if self.launch(callback, record.clone()) {
                launched += 1;
            }
        }
        tracing::debug!(seq = record.seq(), launched, "dispatched record");
        launched
    }

    /// Callbacks for `text` in launch order: exact matches in registration
    /// order, then pattern matches in registration order.
    fn matching(&self, text: &str) -> Vec<Callback> {
        let mut callbacks = self.triggers.lookup_exact(text);
        callbacks.extend(self.triggers.lookup_patterns(text));
        callbacks
    }

    fn launch(&self, callback: Callback, record: Record) -> bool {
        let counters = Arc::clone(&self.counters);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let seq = record.seq();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(record))) {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(seq, reason = %panic_message(payload.as_ref()), "callback panicked");
                }
            });

        match spawned {
            Ok(_detached) => {
                self.counters.launched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.spawn_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to spawn callback thread");
                false
            }
        }
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            records_dispatched: self.counters.records.load(Ordering::Relaxed),
            callbacks_launched: self.counters.launched.load(Ordering::Relaxed),
            callbacks_panicked: self.counters.panicked.load(Ordering::Relaxed),
            spawn_failures: self.counters.spawn_failures.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(TriggerTable::new()), "test")
    }

    #[test]
    fn dispatch_launches_every_exact_callback_with_the_same_record() {
        let d = dispatcher();
        let (tx, rx) = unbounded();
        for i in 0..3 {
            let tx = tx.clone();
            d.triggers()
                .register_exact("x", Arc::new(move |rec: Record| tx.send((i, rec)).unwrap()));
        }

        assert_eq!(d.dispatch(&Record::new(5, "x")), 3);

        let mut seen: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        seen.sort_by_key(|(i, _)| *i);
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, rec)| rec.text() == "x" && rec.seq() == 5));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn launch_order_is_exact_then_patterns_in_registration_order() {
        let d = dispatcher();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let tag = |name: &'static str| -> Callback {
            let log = Arc::clone(&log);
            Arc::new(move |_: Record| log.lock().unwrap().push(name))
        };
        d.triggers().register_regex("^f", tag("pattern-1")).unwrap();
        d.triggers().register_exact("foo", tag("exact-1"));
        d.triggers().register_regex("o$", tag("pattern-2")).unwrap();
        d.triggers().register_exact("foo", tag("exact-2"));
        d.triggers().register_exact("bar", tag("other"));

        for callback in d.matching("foo") {
            callback(Record::new(0, "foo"));
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["exact-1", "exact-2", "pattern-1", "pattern-2"]
        );
    }

    #[test]
    fn dispatch_without_match_launches_nothing() {
        let d = dispatcher();
        d.triggers().register_exact("ping", Arc::new(|_: Record| {}));
        d.triggers().register_regex("^f", Arc::new(|_: Record| {})).unwrap();

        assert_eq!(d.dispatch(&Record::new(0, "bar")), 0);
        let stats = d.stats();
        assert_eq!(stats.records_dispatched, 1);
        assert_eq!(stats.callbacks_launched, 0);
    }

    #[test]
    fn callback_registered_exact_and_pattern_runs_twice() {
        let d = dispatcher();
        let (tx, rx) = unbounded();
        let cb: Callback = Arc::new(move |rec: Record| tx.send(rec.into_text()).unwrap());
        d.triggers().register_exact("foo", Arc::clone(&cb));
        d.triggers().register_regex("^f", cb).unwrap();

        assert_eq!(d.dispatch(&Record::new(0, "foo")), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "foo");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "foo");
    }

    #[test]
    fn dispatch_does_not_wait_for_slow_callbacks() {
        let d = dispatcher();
        let (release_tx, release_rx) = unbounded::<()>();
        let (done_tx, done_rx) = unbounded();
        d.triggers().register_exact(
            "slow",
            Arc::new(move |_: Record| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                done_tx.send(()).unwrap();
            }),
        );

        assert_eq!(d.dispatch(&Record::new(0, "slow")), 1);
        assert!(done_rx.try_recv().is_err());

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn panicking_callback_is_isolated_and_counted() {
        let d = dispatcher();
        let (tx, rx) = unbounded();
        d.triggers()
            .register_exact("boom", Arc::new(|_: Record| panic!("deliberate failure")));
        d.triggers()
            .register_exact("boom", Arc::new(move |rec: Record| tx.send(rec.into_text()).unwrap()));

        assert_eq!(d.dispatch(&Record::new(0, "boom")), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "boom");

        let mut panicked = 0;
        for _ in 0..100 {
            panicked = d.stats().callbacks_panicked;
            if panicked > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(panicked, 1);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
