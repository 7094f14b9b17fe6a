//! Duplicate call suppression.
//!
//! [`SingleFlight`] collapses concurrent calls for the same key into one
//! execution. The first caller becomes the leader and runs the work; later
//! callers block on the in-flight record until the leader publishes its
//! result, which every waiter receives as a clone.
//!
//! The record is removed from the group before waiters are woken, so a
//! caller arriving after completion starts a fresh call.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct CallState<V, E> {
    finished: bool,
    /// `None` after finishing means the leader panicked.
    result: Option<Result<V, E>>,
    waiters: usize,
}

struct Call<V, E> {
    state: Mutex<CallState<V, E>>,
    done: Condvar,
}

impl<V, E> Call<V, E>
where
    V: Clone,
    E: Clone,
{
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState {
                finished: false,
                result: None,
                waiters: 0,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallState<V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the leader finishes. `None` means it panicked.
    fn wait(&self) -> Option<Result<V, E>> {
        let mut state = self.lock();
        state.waiters += 1;
        while !state.finished {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiters -= 1;
        state.result.clone()
    }

    /// Publish the outcome and wake every waiter. Returns the waiter count.
    fn publish(&self, result: Option<Result<V, E>>) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.finished = true;
            state.result = result;
            state.waiters
        };
        self.done.notify_all();
        waiters
    }

    fn waiters(&self) -> usize {
        self.lock().waiters
    }
}

enum Role<V, E> {
    Leader(Arc<Call<V, E>>),
    Waiter(Arc<Call<V, E>>),
}

/// Group of in-flight calls keyed by `K`.
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<K, Arc<Call<V, E>>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, key: &K) -> Role<V, E> {
        let mut calls = self.calls();
        if let Some(call) = calls.get(key) {
            return Role::Waiter(Arc::clone(call));
        }
        let call = Arc::new(Call::new());
        calls.insert(key.clone(), Arc::clone(&call));
        Role::Leader(call)
    }

    fn release(&self, key: &K, call: &Arc<Call<V, E>>, result: Option<Result<V, E>>) -> usize {
        {
            let mut calls = self.calls();
            if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, call)) {
                calls.remove(key);
            }
        }
        call.publish(result)
    }

    /// Execute `work` for `key`, or wait for the call already running for it.
    ///
    /// Every caller that overlaps the leader receives a clone of the
    /// leader's result. If the leader panics, its waiters retry and one of
    /// them becomes the new leader; the panic resumes on the leader's thread.
    pub fn run<F>(&self, key: K, work: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        loop {
            match self.claim(&key) {
                Role::Waiter(call) => {
                    if let Some(result) = call.wait() {
                        return result;
                    }
                }
                Role::Leader(call) => {
                    return match catch_unwind(AssertUnwindSafe(work)) {
                        Ok(result) => {
                            let waiters = self.release(&key, &call, Some(result.clone()));
                            if waiters > 0 {
                                tracing::trace!(waiters, "Shared in-flight result");
                            }
                            result
                        }
                        Err(payload) => {
                            self.release(&key, &call, None);
                            resume_unwind(payload)
                        }
                    };
                }
            }
        }
    }

    /// Number of keys with a call in progress.
    pub fn in_flight(&self) -> usize {
        self.calls().len()
    }

    /// Number of callers currently blocked on the call for `key`.
    pub fn waiters<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let call = self.calls().get(key).cloned();
        call.map(|c| c.waiters()).unwrap_or(0)
    }
}

impl<K, V, E> fmt::Debug for SingleFlight<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self
            .calls
            .lock()
            .map(|calls| calls.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len());
        f.debug_struct("SingleFlight")
            .field("in_flight", &in_flight)
            .finish()
    }
}
