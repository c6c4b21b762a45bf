//! Single-flight coordination for artifact builds.
//!
//! Multiple threads may request builds concurrently; for any one build key
//! at most one job runs at a time process-wide. Jobs themselves carry the
//! staleness checks that make re-runs cheap, so callers that waited simply
//! re-run an idempotent job against a fresh artifact.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;

use crate::error::AdapterResult;

/// Keyed mutual exclusion with condition signaling, injected into [`Module`]
/// so it can be scoped to a process, a test, or a caller-provided context.
///
/// [`Module`]: crate::Module
#[derive(Default)]
pub struct BuildCoordinator {
    inflight: Mutex<HashSet<String>>,
    done: Condvar,
}

impl BuildCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job`, guaranteeing that no other job with the same key runs
    /// concurrently. A caller that finds the key in flight waits on the
    /// condition and loops to re-check, which covers the case where another
    /// waiter raced in between wake-up and re-check. The marker is cleared
    /// and all waiters are woken on every exit path, job failure included.
    pub fn run_once<T>(
        &self,
        key: &str,
        job: impl FnOnce() -> AdapterResult<T>,
    ) -> AdapterResult<T> {
        let mut inflight = self.inflight.lock().unwrap();
        while !inflight.insert(key.to_string()) {
            inflight = self.done.wait(inflight).unwrap();
        }
        drop(inflight);

        // The guard clears the marker even if the job panics; waiters must
        // never be left blocked on a key that will not complete.
        let _guard = FlightGuard {
            coordinator: self,
            key,
        };
        job()
    }
}

struct FlightGuard<'a> {
    coordinator: &'a BuildCoordinator,
    key: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.coordinator.inflight.lock().unwrap();
        inflight.remove(self.key);
        self.coordinator.done.notify_all();
    }
}

/// The process-wide default coordinator used by modules that were not given
/// an explicit one.
pub fn global() -> Arc<BuildCoordinator> {
    static GLOBAL: Lazy<Arc<BuildCoordinator>> = Lazy::new(Arc::default);
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_single_flight_builds_once() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let built = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let built = built.clone();
            let runs = runs.clone();
            handles.push(thread::spawn(move || {
                coordinator.run_once("key", || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    // Idempotent job: only the first runner performs the
                    // expensive build, everyone else sees a fresh artifact.
                    if built.load(Ordering::SeqCst) == 0 {
                        thread::sleep(std::time::Duration::from_millis(20));
                        built.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                })
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_distinct_keys_run_in_parallel() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for key in ["a", "b"] {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                coordinator.run_once(key, || {
                    // Both jobs must be inside their critical sections at the
                    // same time for the barrier to release.
                    barrier.wait();
                    Ok(())
                })
            }));
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_marker_cleared_on_error() {
        let coordinator = BuildCoordinator::new();
        let result: AdapterResult<()> = coordinator.run_once("key", || {
            Err(AdapterError::StaleHandle)
        });
        assert!(result.is_err());

        // A failed job must not leave the key claimed.
        coordinator.run_once("key", || Ok(())).unwrap();
    }

    #[test]
    fn test_marker_cleared_on_panic() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let inner = coordinator.clone();
        let panicked = thread::spawn(move || {
            let _: AdapterResult<()> = inner.run_once("key", || panic!("boom"));
        })
        .join();
        assert!(panicked.is_err());

        coordinator.run_once("key", || Ok(())).unwrap();
    }
}
