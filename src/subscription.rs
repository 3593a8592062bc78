//! Live subscriptions.
//!
//! A subscription observes one type under a query. It receives the initial
//! result set and, after every committed mutation that could change the
//! result, a fresh materialization. Consecutive identical results are
//! collapsed by a keyed content fingerprint, and each subscription's pushes
//! are strictly serialized by its own mutex.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use crate::access::Caller;
use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::Query;
use crate::record::Record;
use crate::set::Set;
use crate::store::{Store, StoreInner};

/// Key for the result fingerprint. Stability across a process lifetime is
/// all that matters; this is change detection, not authentication.
const FINGERPRINT_KEY: &[u8; 32] = b"rippledb.subscription.fingerprnt";

/// Receives subscription results.
///
/// The outcome is either the freshly loaded result set or the error that
/// prevented loading it. Returning an error from `deliver` evicts the
/// subscription.
pub trait Subscriber<T>: Send + Sync + 'static {
    /// Handles one push.
    fn deliver(&self, outcome: StoreResult<Vec<T>>) -> StoreResult<()>;
}

impl<T, F> Subscriber<T> for F
where
    F: Fn(StoreResult<Vec<T>>) -> StoreResult<()> + Send + Sync + 'static,
{
    fn deliver(&self, outcome: StoreResult<Vec<T>>) -> StoreResult<()> {
        self(outcome)
    }
}

/// Registry entry: a subscription with its concrete type erased. The push
/// path downcasts back to the type it owns.
pub(crate) trait ErasedSubscription: Send + Sync {
    fn matches(&self, record: &dyn Any) -> bool;
    fn push(&self);
}

struct PushState {
    last_fingerprint: Option<blake3::Hash>,
}

pub(crate) struct Subscription<T, S> {
    id: Id,
    query: Query,
    caller: Caller,
    store: Weak<StoreInner>,
    sink: S,
    // Serializes entire pushes, and owns the fingerprint of the last
    // delivered result.
    state: Mutex<PushState>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record, S: Subscriber<T>> Subscription<T, S> {
    pub(crate) fn new(id: Id, query: Query, caller: Caller, store: &Store, sink: S) -> Self {
        Self {
            id,
            query,
            caller,
            store: store.downgrade(),
            sink,
            state: Mutex::new(PushState {
                last_fingerprint: None,
            }),
            _record: PhantomData,
        }
    }

    fn evict(&self, store: &Store) {
        debug!(
            subscription = %self.id,
            type_name = T::type_name(),
            "sink failed, evicting subscription"
        );
        let _ = store.remove_subscription(T::type_name(), &self.id.to_hex());
    }
}

impl<T: Record, S: Subscriber<T>> ErasedSubscription for Subscription<T, S> {
    fn matches(&self, record: &dyn Any) -> bool {
        let Some(record) = record.downcast_ref::<T>() else {
            return false;
        };
        let set = self.query.set.as_ref().unwrap_or(&Set::All);
        match set.matches(record) {
            Ok(matches) => matches,
            Err(err) => {
                warn!(
                    subscription = %self.id,
                    type_name = T::type_name(),
                    error = %err,
                    "match failed, treating as non-match"
                );
                false
            }
        }
    }

    // Holding the state lock across both the load and the delivery is
    // deliberate: no client is interested in parallel deliveries from the
    // same subscription, and other subscriptions push on their own locks.
    fn push(&self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let store = Store::from_inner(inner);
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let loaded = store.view(self.caller, |view| view.select::<T>(&self.query));
        let serialized = loaded.and_then(|results| {
            let bytes = serde_json::to_vec(&results).map_err(StoreError::from)?;
            Ok((results, blake3::keyed_hash(FINGERPRINT_KEY, &bytes)))
        });
        match serialized {
            Ok((results, fingerprint)) => {
                if state.last_fingerprint == Some(fingerprint) {
                    return;
                }
                match self.sink.deliver(Ok(results)) {
                    Ok(()) => state.last_fingerprint = Some(fingerprint),
                    Err(_) => self.evict(&store),
                }
            }
            // The stored fingerprint stays untouched, so the next
            // successful load is always delivered.
            Err(err) => {
                if self.sink.deliver(Err(err)).is_err() {
                    self.evict(&store);
                }
            }
        }
    }
}

/// Handle to a live subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Id,
    type_name: &'static str,
    store: Weak<StoreInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: Id, type_name: &'static str, store: &Store) -> Self {
        Self {
            id,
            type_name,
            store: store.downgrade(),
        }
    }

    /// The subscription's id.
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Removes the subscription from the registry. Fails with `NotOpen`
    /// when it was already closed or evicted.
    pub fn close(&self) -> StoreResult<()> {
        let inner = self.store.upgrade().ok_or(StoreError::NotOpen)?;
        let store = Store::from_inner(inner);
        store
            .remove_subscription(self.type_name, &self.id.to_hex())
            .map(|_| ())
            .ok_or(StoreError::NotOpen)
    }
}

/// The subscriptions a transaction has touched, keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriptionSet {
    entries: HashMap<String, std::sync::Arc<dyn ErasedSubscription>>,
}

impl SubscriptionSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn merge(
        &mut self,
        subscriptions: Vec<(String, std::sync::Arc<dyn ErasedSubscription>)>,
    ) {
        for (key, subscription) in subscriptions {
            self.entries.insert(key, subscription);
        }
    }

    pub(crate) fn drain(self) -> Vec<std::sync::Arc<dyn ErasedSubscription>> {
        self.entries.into_values().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
