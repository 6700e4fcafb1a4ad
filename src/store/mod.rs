//! Generic async store: Idle -> Loading -> Loaded | Error -> (reset) -> Idle.
//!
//! At most one load is in flight per store. Every load is issued a
//! [`LoadTicket`]; a result arriving with a ticket that is no longer current
//! (because the store was abandoned meanwhile) is discarded instead of
//! overwriting newer state.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{AccessError, Result};

/// Callback invoked after every committed transition.
pub type StoreObserver<T> = Arc<dyn Fn(&StoreState<T>) + Send + Sync>;

/// Handle returned by [`AsyncStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Proof that the holder started the current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

/// Snapshot of a store. `data` and `error` are never both set.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreState<T> {
    pub loading: bool,
    pub loaded: bool,
    pub error: Option<AccessError>,
    pub data: Option<T>,
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            loaded: false,
            error: None,
            data: None,
        }
    }
}

impl<T> StoreState<T> {
    pub fn phase(&self) -> StorePhase {
        if self.loading {
            StorePhase::Loading
        } else if self.error.is_some() {
            StorePhase::Error
        } else if self.loaded {
            StorePhase::Loaded
        } else {
            StorePhase::Idle
        }
    }

    /// Loaded without error.
    pub fn succeeded(&self) -> bool {
        self.phase() == StorePhase::Loaded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Idle,
    Loading,
    Loaded,
    Error,
}

struct Inner<T> {
    state: StoreState<T>,
    generation: u64,
}

/// Single-flight state container with synchronous observer notification.
///
/// # Example
/// ```
/// use cluster_access::store::{AsyncStore, StorePhase};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let store: AsyncStore<u32> = AsyncStore::new("numbers");
/// assert!(store.load(async { Ok(7) }).await);
/// let state = store.snapshot();
/// assert_eq!(state.phase(), StorePhase::Loaded);
/// assert_eq!(state.data, Some(7));
/// # });
/// ```
pub struct AsyncStore<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    observers: Mutex<Vec<(SubscriptionId, StoreObserver<T>)>>,
    next_subscription: AtomicU64,
}

impl<T: Clone> AsyncStore<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                state: StoreState::default(),
                generation: 0,
            }),
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn snapshot(&self) -> StoreState<T> {
        self.lock_inner().state.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_inner().state.loading
    }

    /// Register an observer. It is called with the new snapshot after every
    /// committed transition, outside the state lock.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreState<T>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Run `task` as the store's load. Returns `false` without polling the
    /// task when a load is already in flight, or when the result was
    /// discarded as stale.
    pub async fn load<F>(&self, task: F) -> bool
    where
        F: Future<Output = Result<T>>,
    {
        let Some(ticket) = self.begin() else {
            return false;
        };
        let result = task.await;
        self.finish(ticket, result)
    }

    /// Enter Loading. Prior data and error are cleared.
    pub fn begin(&self) -> Option<LoadTicket> {
        let (ticket, snapshot) = {
            let mut inner = self.lock_inner();
            if inner.state.loading {
                debug!(store = self.name, "load ignored, already loading");
                return None;
            }
            inner.generation += 1;
            inner.state = StoreState {
                loading: true,
                ..StoreState::default()
            };
            (
                LoadTicket {
                    generation: inner.generation,
                },
                inner.state.clone(),
            )
        };
        self.notify(&snapshot);
        Some(ticket)
    }

    /// Whether `ticket` still identifies the in-flight load.
    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        let inner = self.lock_inner();
        inner.state.loading && inner.generation == ticket.generation
    }

    pub fn finish(&self, ticket: LoadTicket, result: Result<T>) -> bool {
        self.commit(ticket, result, |_| {})
    }

    /// Commit the outcome of the load identified by `ticket`.
    ///
    /// `apply` runs only for a successful, current result and before
    /// observers are notified; it is where side effects on borrowed state
    /// belong so a stale result can never reach them.
    pub fn commit<F>(&self, ticket: LoadTicket, result: Result<T>, apply: F) -> bool
    where
        F: FnOnce(&T),
    {
        let snapshot = {
            let mut inner = self.lock_inner();
            if !inner.state.loading || inner.generation != ticket.generation {
                debug!(store = self.name, "discarding stale load result");
                return false;
            }
            inner.state = match result {
                Ok(data) => {
                    apply(&data);
                    StoreState {
                        loading: false,
                        loaded: true,
                        error: None,
                        data: Some(data),
                    }
                }
                Err(error) => StoreState {
                    loading: false,
                    loaded: true,
                    error: Some(error),
                    data: None,
                },
            };
            inner.state.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Mark the store Loaded without running a task.
    pub fn mark_loaded(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock_inner();
            if inner.state.loading {
                return Err(AccessError::StoreBusy(self.name));
            }
            inner.state.loaded = true;
            inner.state.error = None;
            inner.state.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Return to Idle. Rejected while a load is in flight.
    pub fn reset(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock_inner();
            if inner.state.loading {
                return Err(AccessError::StoreBusy(self.name));
            }
            inner.state = StoreState::default();
            inner.state.clone()
        };
        self.notify(&snapshot);
        Ok(())
    }

    /// Forced return to Idle that also invalidates any in-flight ticket.
    /// The abandoned call is not aborted; its result is dropped on arrival.
    pub fn abandon(&self) {
        let snapshot = {
            let mut inner = self.lock_inner();
            inner.generation += 1;
            inner.state = StoreState::default();
            inner.state.clone()
        };
        debug!(store = self.name, "store abandoned");
        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &StoreState<T>) {
        let observers: Vec<StoreObserver<T>> = self
            .lock_observers()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(snapshot);
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, StoreObserver<T>)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
