//! Trigger table: exact and pattern triggers with their callbacks.
//!
//! The table exclusively owns its lists. Reads copy the matching callbacks
//! out; writes append under a lock held only for the mutation. The exact map
//! and the pattern list sit behind independent locks since they are never
//! read or written together.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsoleError, ConsoleResult};
use crate::record::Record;

use super::matcher::Matcher;

/// Unit of work invoked with a matching record.
pub type Callback = Arc<dyn Fn(Record) + Send + Sync + 'static>;

/// Unique identifier for one registration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(Uuid);

impl TriggerId {
    /// Create a new random trigger id.
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ExactEntry {
    id: TriggerId,
    callback: Callback,
}

struct PatternEntry {
    id: TriggerId,
    matcher: Arc<dyn Matcher>,
    callback: Callback,
}

/// Concurrency-safe mapping from triggers to callbacks.
#[derive(Default)]
pub struct TriggerTable {
    exact: RwLock<HashMap<String, Vec<ExactEntry>>>,
    patterns: RwLock<Vec<PatternEntry>>,
}

// Callbacks never run under a table lock, so a poisoned lock still guards a
// consistent list.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl TriggerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the list for `trigger`.
    pub fn register_exact(&self, trigger: impl Into<String>, callback: Callback) -> TriggerId {
        let id = TriggerId::new();
        let trigger = trigger.into();
        tracing::debug!(%id, trigger = %trigger, "registered exact trigger");
        write(&self.exact)
            .entry(trigger)
            .or_default()
            .push(ExactEntry { id, callback });
        id
    }

    /// Append a pattern trigger, keeping registration order.
    pub fn register_pattern(&self, matcher: Arc<dyn Matcher>, callback: Callback) -> TriggerId {
        let id = TriggerId::new();
        tracing::debug!(%id, pattern = %matcher.describe(), "registered pattern trigger");
        write(&self.patterns).push(PatternEntry { id, matcher, callback });
        id
    }

    /// Compile `pattern` as a regex and register it.
    pub fn register_regex(&self, pattern: &str, callback: Callback) -> ConsoleResult<TriggerId> {
        let re = Regex::new(pattern).map_err(|e| ConsoleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.register_pattern(Arc::new(re), callback))
    }

    /// Remove one registration. Returns false if `id` is unknown.
    pub fn unregister(&self, id: TriggerId) -> bool {
        {
            let mut exact = write(&self.exact);
            let mut emptied = None;
            let mut found = false;
            for (trigger, entries) in exact.iter_mut() {
                if let Some(pos) = entries.iter().position(|e| e.id == id) {
                    entries.remove(pos);
                    found = true;
                    if entries.is_empty() {
                        emptied = Some(trigger.clone());
                    }
                    break;
                }
            }
            if let Some(trigger) = emptied {
                exact.remove(&trigger);
            }
            if found {
                tracing::debug!(%id, "unregistered exact trigger");
                return true;
            }
        }

        let mut patterns = write(&self.patterns);
        match patterns.iter().position(|e| e.id == id) {
            Some(pos) => {
                patterns.remove(pos);
                tracing::debug!(%id, "unregistered pattern trigger");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the callbacks registered for exactly `text`.
    #[must_use]
    pub fn lookup_exact(&self, text: &str) -> Vec<Callback> {
        read(&self.exact)
            .get(text)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default()
    }

    /// Callbacks of every pattern matching `text`, in registration order.
    #[must_use]
    pub fn lookup_patterns(&self, text: &str) -> Vec<Callback> {
        read(&self.patterns)
            .iter()
            .filter(|e| e.matcher.is_match(text))
            .map(|e| Arc::clone(&e.callback))
            .collect()
    }

    /// Number of exact registrations, counting every callback.
    #[must_use]
    pub fn exact_len(&self) -> usize {
        read(&self.exact).values().map(Vec::len).sum()
    }

    /// Number of pattern registrations.
    #[must_use]
    pub fn pattern_len(&self) -> usize {
        read(&self.patterns).len()
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact_len() + self.pattern_len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TriggerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerTable")
            .field("exact", &self.exact_len())
            .field("patterns", &self.pattern_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::console::matcher::Prefix;

    fn tagged(log: &Arc<std::sync::Mutex<Vec<&'static str>>>, tag: &'static str) -> Callback {
        let log = Arc::clone(log);
        Arc::new(move |_rec: Record| log.lock().unwrap().push(tag))
    }

    fn noop() -> Callback {
        Arc::new(|_: Record| {})
    }

    fn run_all(callbacks: &[Callback], text: &str) {
        for cb in callbacks {
            cb(Record::new(0, text));
        }
    }

    #[test]
    fn lookup_exact_returns_callbacks_in_registration_order() {
        let table = TriggerTable::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        table.register_exact("x", tagged(&log, "first"));
        table.register_exact("x", tagged(&log, "second"));
        table.register_exact("y", tagged(&log, "other"));

        let found = table.lookup_exact("x");
        assert_eq!(found.len(), 2);
        run_all(&found, "x");
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn lookup_exact_unknown_is_empty() {
        let table = TriggerTable::new();
        table.register_exact("ping", noop());
        assert!(table.lookup_exact("pin").is_empty());
        assert!(table.lookup_exact("ping ").is_empty());
    }

    #[test]
    fn lookup_patterns_returns_every_match() {
        let table = TriggerTable::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        table.register_regex("^f", tagged(&log, "starts-f")).unwrap();
        table.register_regex("o$", tagged(&log, "ends-o")).unwrap();
        table.register_pattern(Arc::new(Prefix("bar".to_string())), tagged(&log, "bar"));

        assert_eq!(table.lookup_patterns("fa").len(), 1);
        assert_eq!(table.lookup_patterns("zoo").len(), 1);

        let found = table.lookup_patterns("foo");
        assert_eq!(found.len(), 2);
        run_all(&found, "foo");
        assert_eq!(*log.lock().unwrap(), vec!["starts-f", "ends-o"]);

        assert!(table.lookup_patterns("zzz").is_empty());
    }

    #[test]
    fn register_regex_rejects_invalid_pattern() {
        let table = TriggerTable::new();
        let err = table.register_regex("(unclosed", noop()).unwrap_err();
        let ConsoleError::InvalidPattern { pattern, .. } = err else {
            panic!("expected invalid pattern, got {err:?}");
        };
        assert_eq!(pattern, "(unclosed");
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_registration() {
        let table = TriggerTable::new();
        table.register_exact("x", noop());
        let snapshot = table.lookup_exact("x");
        table.register_exact("x", noop());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(table.lookup_exact("x").len(), 2);
    }

    #[test]
    fn unregister_removes_only_the_given_registration() {
        let table = TriggerTable::new();
        let a = table.register_exact("x", noop());
        let b = table.register_exact("x", noop());
        let p = table.register_regex(".*", noop()).unwrap();
        assert_eq!(table.len(), 3);

        assert!(table.unregister(a));
        assert!(!table.unregister(a));
        assert_eq!(table.lookup_exact("x").len(), 1);

        assert!(table.unregister(b));
        assert_eq!(table.exact_len(), 0);

        assert!(table.unregister(p));
        assert!(table.is_empty());
        assert!(!table.unregister(TriggerId::new()));
    }

    #[test]
    fn concurrent_registration_never_loses_an_entry() {
        let table = Arc::new(TriggerTable::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let hits = Arc::clone(&hits);
                        table.register_exact(
                            "x",
                            Arc::new(move |_: Record| {
                                hits.fetch_add(1, Ordering::Relaxed);
                            }),
                        );
                        let _ = table.lookup_exact("x");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let found = table.lookup_exact("x");
        assert_eq!(found.len(), 800);
        run_all(&found, "x");
        assert_eq!(hits.load(Ordering::Relaxed), 800);
    }
}
