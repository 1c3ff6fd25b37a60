//! Record-stable barrier.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A callback deferred until a record is stable.
pub type StableCallback = Box<dyn FnOnce(&str) + Send>;

/// Per-record FIFO of callbacks waiting for outstanding record work.
///
/// A record has work in progress from the moment a callback is run for it
/// until the matching [`remove_record_request`](Self::remove_record_request).
/// Callbacks arriving meanwhile are queued and released one at a time, in
/// arrival order, by each later removal.
#[derive(Default)]
pub struct RecordStability {
    in_progress: Mutex<HashMap<String, VecDeque<StableCallback>>>,
}

impl RecordStability {
    /// Creates an empty barrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` now if no work is in progress for `name`, otherwise
    /// queues it.
    pub fn run_when_record_stable(&self, name: &str, callback: StableCallback) {
        {
            let mut in_progress = self.in_progress.lock();
            match in_progress.get_mut(name) {
                Some(queue) => {
                    queue.push_back(callback);
                    return;
                }
                None => {
                    in_progress.insert(name.to_string(), VecDeque::new());
                }
            }
        }
        callback(name);
    }

    /// Marks the current work on `name` as done and releases the next
    /// queued callback, if any.
    pub fn remove_record_request(&self, name: &str) {
        let next = {
            let mut in_progress = self.in_progress.lock();
            let Some(queue) = in_progress.get_mut(name) else {
                return;
            };
            match queue.pop_front() {
                Some(callback) => callback,
                None => {
                    in_progress.remove(name);
                    return;
                }
            }
        };
        next(name);
    }

    /// Returns the number of callbacks waiting on `name`.
    pub fn pending(&self, name: &str) -> usize {
        self.in_progress.lock().get(name).map_or(0, VecDeque::len)
    }

    /// Returns true if work is in progress for `name`.
    pub fn is_busy(&self, name: &str) -> bool {
        self.in_progress.lock().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> StableCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &'static str| -> StableCallback {
            let sink = sink.clone();
            Box::new(move |name: &str| sink.lock().push(format!("{tag}:{name}")))
        };
        (log, make)
    }

    #[test]
    fn runs_immediately_when_idle() {
        let (log, make) = recorder();
        let barrier = RecordStability::new();

        barrier.run_when_record_stable("a", make("first"));
        assert_eq!(*log.lock(), vec!["first:a".to_string()]);
        assert!(barrier.is_busy("a"));
    }

    #[test]
    fn releases_in_fifo_order() {
        let (log, make) = recorder();
        let barrier = RecordStability::new();

        barrier.run_when_record_stable("a", make("1"));
        barrier.run_when_record_stable("a", make("2"));
        barrier.run_when_record_stable("a", make("3"));
        assert_eq!(log.lock().len(), 1);
        assert_eq!(barrier.pending("a"), 2);

        barrier.remove_record_request("a");
        barrier.remove_record_request("a");
        assert_eq!(
            *log.lock(),
            vec!["1:a".to_string(), "2:a".to_string(), "3:a".to_string()]
        );

        barrier.remove_record_request("a");
        assert!(!barrier.is_busy("a"));
    }

    #[test]
    fn records_are_independent() {
        let (log, make) = recorder();
        let barrier = RecordStability::new();

        barrier.run_when_record_stable("a", make("x"));
        barrier.run_when_record_stable("b", make("y"));
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn remove_without_work_is_noop() {
        let barrier = RecordStability::new();
        barrier.remove_record_request("a");
        assert!(!barrier.is_busy("a"));
    }

    #[test]
    fn callback_may_reenter() {
        let barrier = Arc::new(RecordStability::new());
        let inner = barrier.clone();
        barrier.run_when_record_stable(
            "a",
            Box::new(move |name: &str| inner.remove_record_request(name)),
        );
        assert!(!barrier.is_busy("a"));
    }
}
