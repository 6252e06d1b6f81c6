//! Observable state container with patch-based updates and memoized views.
//!
//! A [`Store`] owns exactly one state value. The value is never mutated in
//! place: every patch merges a partial over the current state and publishes
//! the result as a new `Arc<S>` together with a bumped version number. Readers
//! holding an older `Arc` keep seeing the state they read.
//!
//! [`Derived`] views are memoized projections of the state. A view built with
//! [`Store::derive`] is cached per published version; a view built with
//! [`Store::select`] is cached on the value of the field(s) it depends on and
//! therefore survives patches that touch unrelated fields.
//!
//! # Invariants
//!
//! 1. The version increments exactly once per published patch; a
//!    `try_update` that declines publishes nothing.
//! 2. Patches never interleave: writers are serialized by the patch lock.
//! 3. `Derived::get()` never returns a value computed from an older version
//!    than the one current at the time of the call.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use thiserror::Error;
use tokio::sync::watch;

/// Shallow merge of a partial value over a complete state.
pub trait Merge: Sized {
    type Partial;

    fn merge(&self, partial: Self::Partial) -> Self;
}

/// A published state together with the version it was published at.
#[derive(Debug)]
pub struct Snapshot<S> {
    pub version: u64,
    pub state: Arc<S>,
}

impl<S> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("store was dropped")]
pub struct StoreClosed;

pub struct Store<S> {
    current: watch::Sender<Snapshot<S>>,
    patch_lock: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every value behind these locks is replaced wholesale, so a panic while
    // holding one cannot leave a half-written value behind.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S> Store<S>
where
    S: Merge + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        let (current, _) = watch::channel(Snapshot {
            version: 0,
            state: Arc::new(initial),
        });
        Self {
            current,
            patch_lock: Mutex::new(()),
        }
    }

    /// Current state. Cheap: clones an `Arc`.
    pub fn read(&self) -> Arc<S> {
        Arc::clone(&self.current.borrow().state)
    }

    pub fn version(&self) -> u64 {
        self.current.borrow().version
    }

    pub fn snapshot(&self) -> Snapshot<S> {
        self.current.borrow().clone()
    }

    /// Merge `partial` over the current state and publish the result.
    pub fn set(&self, partial: S::Partial) {
        self.update(|_| partial);
    }

    /// Compute a partial from the current state, merge it and publish.
    ///
    /// `patch` may read this store but must not patch it.
    pub fn update(&self, patch: impl FnOnce(&S) -> S::Partial) {
        self.try_update(|state| Some(patch(state)));
    }

    /// Like [`Store::update`], but publishes nothing when `patch` returns
    /// `None`. Returns whether a new state was published.
    pub fn try_update(&self, patch: impl FnOnce(&S) -> Option<S::Partial>) -> bool {
        let _guard = lock(&self.patch_lock);
        let current = self.snapshot();
        let Some(partial) = patch(&current.state) else {
            return false;
        };
        let next = current.state.merge(partial);
        self.current.send_replace(Snapshot {
            version: current.version + 1,
            state: Arc::new(next),
        });
        true
    }

    /// Receiver that is notified after every published patch.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<S>> {
        self.current.subscribe()
    }

    /// View equal to `selector(read())`, cached until the next patch.
    pub fn derive<T, F>(&self, selector: F) -> Derived<S, T>
    where
        T: Send + Sync + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        let memo = Memo {
            key: Box::new(|snapshot: &Snapshot<S>| snapshot.version),
            compute: Box::new(move |state: &S, _: &u64| selector(state)),
            cache: Mutex::new(None),
            recomputations: AtomicU64::new(0),
        };
        Derived {
            source: self.subscribe(),
            memo: Arc::new(memo),
        }
    }

    /// View recomputed only when `dependency(state)` changes value.
    pub fn select<D, T, DF, CF>(&self, dependency: DF, compute: CF) -> Derived<S, T>
    where
        D: PartialEq + Send + Sync + 'static,
        T: Send + Sync + 'static,
        DF: Fn(&S) -> D + Send + Sync + 'static,
        CF: Fn(&D) -> T + Send + Sync + 'static,
    {
        let memo = Memo {
            key: Box::new(move |snapshot: &Snapshot<S>| dependency(&snapshot.state)),
            compute: Box::new(move |_: &S, dependency: &D| compute(dependency)),
            cache: Mutex::new(None),
            recomputations: AtomicU64::new(0),
        };
        Derived {
            source: self.subscribe(),
            memo: Arc::new(memo),
        }
    }
}

impl<S> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.current.borrow().version)
            .field("subscribers", &self.current.receiver_count())
            .finish()
    }
}

type KeyFn<S, K> = Box<dyn Fn(&Snapshot<S>) -> K + Send + Sync>;
type ComputeFn<S, K, T> = Box<dyn Fn(&S, &K) -> T + Send + Sync>;

struct Memo<S, K, T> {
    key: KeyFn<S, K>,
    compute: ComputeFn<S, K, T>,
    cache: Mutex<Option<(K, Arc<T>)>>,
    recomputations: AtomicU64,
}

trait Evaluate<S, T>: Send + Sync {
    fn evaluate(&self, snapshot: &Snapshot<S>) -> Arc<T>;
    fn recomputations(&self) -> u64;
}

impl<S, K, T> Evaluate<S, T> for Memo<S, K, T>
where
    S: Send + Sync,
    K: PartialEq + Send + Sync,
    T: Send + Sync,
{
    fn evaluate(&self, snapshot: &Snapshot<S>) -> Arc<T> {
        let key = (self.key)(snapshot);
        let mut cache = lock(&self.cache);
        if let Some((seen, value)) = cache.as_ref() {
            if *seen == key {
                return Arc::clone(value);
            }
        }
        let value = Arc::new((self.compute)(&snapshot.state, &key));
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        *cache = Some((key, Arc::clone(&value)));
        value
    }

    fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }
}

/// Read-only, memoized projection of a [`Store`].
///
/// Clones share the same cache.
pub struct Derived<S, T> {
    source: watch::Receiver<Snapshot<S>>,
    memo: Arc<dyn Evaluate<S, T>>,
}

impl<S, T> Clone for Derived<S, T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            memo: Arc::clone(&self.memo),
        }
    }
}

impl<S, T> Derived<S, T> {
    pub fn get(&self) -> Arc<T> {
        let snapshot = self.source.borrow().clone();
        self.memo.evaluate(&snapshot)
    }

    /// How many times the projection has actually been computed.
    pub fn recomputations(&self) -> u64 {
        self.memo.recomputations()
    }

    /// Wait until a patch is published after the last one this view observed.
    pub async fn changed(&mut self) -> Result<(), StoreClosed> {
        self.source.changed().await.map_err(|_| StoreClosed)
    }
}

impl<S, T: std::fmt::Debug> std::fmt::Debug for Derived<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("value", &self.get())
            .field("recomputations", &self.recomputations())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
