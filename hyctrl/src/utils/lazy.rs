use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread::{self, ThreadId},
};

use crossbeam::utils::Backoff;
use parking_lot::{Mutex, RwLock};

const STATE_EMPTY: usize = 0; // No value, nobody computing
const STATE_COMPUTING: usize = 1; // Value is being computed (should not compute nor read)
const STATE_READY: usize = 2; // Value is present and never changes again

/// Memoise-once cell shared between threads.
///
/// The first caller of [`LazyCell::get_or_init`] computes the value while
/// concurrent callers wait for it; every caller observes the same value. The
/// value is written exactly once and never invalidated.
///
/// A computation that (directly or indirectly) asks for the value of its own
/// cell on the computing thread would otherwise wait for itself forever; this
/// is reported as a panic instead.
pub struct LazyCell<T> {
    elem: RwLock<Option<T>>,
    state: AtomicUsize,
    owner: Mutex<Option<ThreadId>>,
}

/// Puts the cell back to EMPTY if the computation unwinds.
struct ComputingGuard<'a, T> {
    cell: &'a LazyCell<T>,
    done: bool,
}

impl<'a, T> Drop for ComputingGuard<'a, T> {
    fn drop(&mut self) {
        *self.cell.owner.lock() = None;
        if !self.done {
            self.cell.state.store(STATE_EMPTY, Ordering::Release);
        }
    }
}

impl<T> LazyCell<T> {
    pub const fn new() -> Self {
        Self {
            elem: RwLock::new(None),
            state: AtomicUsize::new(STATE_EMPTY),
            owner: Mutex::new(None),
        }
    }

    /// Whether the value has been computed.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_READY
    }

    fn begin(&self) -> Option<ComputingGuard<'_, T>> {
        self.state
            .compare_exchange(
                STATE_EMPTY,
                STATE_COMPUTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        *self.owner.lock() = Some(thread::current().id());
        Some(ComputingGuard {
            cell: self,
            done: false,
        })
    }

    fn finish(&self, mut guard: ComputingGuard<'_, T>, value: T) {
        *self.elem.write() = Some(value);
        guard.done = true;
        self.state.store(STATE_READY, Ordering::Release);
    }
}

impl<T: Clone> LazyCell<T> {
    /// Retrieve the value if it has already been computed.
    pub fn get(&self) -> Option<T> {
        if self.is_ready() {
            self.elem.read().clone()
        } else {
            None
        }
    }

    /// Retrieve the value, computing it with `compute` if this is the first request.
    pub fn get_or_init(&self, compute: impl FnOnce() -> T) -> T {
        let backoff = Backoff::new();

        loop {
            match self.state.load(Ordering::Acquire) {
                STATE_READY => {
                    return self
                        .elem
                        .read()
                        .clone()
                        .expect("Value should be present when state is READY");
                }
                STATE_EMPTY => {
                    if let Some(guard) = self.begin() {
                        let value = compute();
                        self.finish(guard, value.clone());
                        return value;
                    }
                }
                _ => {
                    if *self.owner.lock() == Some(thread::current().id()) {
                        panic!("cyclic lazy computation: a memoised value depends on itself");
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Store `value` unless the cell is already set or being computed.
    ///
    /// Returns `true` if this call stored the value.
    pub fn set(&self, value: T) -> bool {
        match self.begin() {
            Some(guard) => {
                self.finish(guard, value);
                true
            }
            None => false,
        }
    }
}

impl<T> Default for LazyCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("LazyCell").field(&value).finish(),
            None => f.write_str("LazyCell(<pending>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn computes_once() {
        let cell = LazyCell::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cell.get_or_init(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                42u32
            });
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_threads_converge() {
        let cell = Arc::new(LazyCell::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cell.get_or_init(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        i
                    })
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_only_once() {
        let cell = LazyCell::new();
        assert!(cell.get().is_none());
        assert!(cell.set(1));
        assert!(!cell.set(2));
        assert_eq!(cell.get_or_init(|| 3), 1);
    }

    #[test]
    #[should_panic(expected = "cyclic lazy computation")]
    fn reentrant_computation_panics() {
        let cell: LazyCell<u32> = LazyCell::new();
        cell.get_or_init(|| cell.get_or_init(|| 1));
    }

    #[test]
    fn unwinding_computation_resets_cell() {
        let cell: LazyCell<u32> = LazyCell::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cell.get_or_init(|| panic!("boom"))
        }));
        assert!(result.is_err());
        assert_eq!(cell.get_or_init(|| 7), 7);
    }
}
