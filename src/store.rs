//! The store: options, lifecycle, registry, and entry points.
//!
//! A [`Store`] wraps a pooled SQLite handle, the registry of record types
//! with their control predicates, the live subscription registry, and the
//! worker pool that delivers post-commit subscription pushes. Cloning a
//! `Store` is cheap; all clones share one underlying state.

use std::any::Any;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::access::{erase_update_control, Caller, QueryControl, UpdateControl};
use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::Query;
use crate::record::Record;
use crate::schema::Schema;
use crate::set::Set;
use crate::subscription::{
    ErasedSubscription, Subscriber, Subscription, SubscriptionHandle,
};
use crate::sync::SyncMap;
use crate::transaction::{Update, View};

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Path of the backing database file.
    pub path: PathBuf,
    /// Seed for the id generator. Fresh entropy when absent.
    pub random_seed: Option<u64>,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Worker threads delivering subscription pushes.
    pub push_workers: usize,
    /// Log SELECT statements at debug level.
    pub log_queries: bool,
    /// Log DML/DDL statements at debug level.
    pub log_statements: bool,
}

impl Options {
    /// Default options against the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            random_seed: None,
            pool_size: 8,
            push_workers: 4,
            log_queries: false,
            log_statements: false,
        }
    }

    /// Opens a store using these options.
    pub fn open(self) -> StoreResult<Store> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StoreError::backend(format!("create {}: {err}", parent.display()))
                })?;
            }
        }
        let manager = SqliteConnectionManager::file(&self.path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
            ",
            )
        });
        let pool = Pool::builder()
            .max_size(self.pool_size.max(1))
            .build(manager)
            .map_err(|err| StoreError::backend(err.to_string()))?;
        // Fail early when the file is unusable.
        pool.get()?
            .query_row("SELECT 1;", [], |_row| Ok(()))
            .map_err(StoreError::from)?;

        let rng = match self.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let push_pool = PushPool::start(self.push_workers.max(1));
        info!(path = %self.path.display(), "store opened");
        Ok(Store {
            inner: Arc::new(StoreInner {
                pool,
                options: self,
                rng: Mutex::new(rng),
                types: SyncMap::new(),
                subscriptions: SyncMap::new(),
                push_pool,
            }),
        })
    }
}

/// A registered type: its derived schema and bound controls.
pub(crate) struct RegisteredType {
    pub(crate) schema: Schema,
    pub(crate) query_control: QueryControl,
    pub(crate) update_control: UpdateControl,
}

type SubscriptionMap = SyncMap<String, Arc<dyn ErasedSubscription>>;

pub(crate) struct StoreInner {
    pool: Pool<SqliteConnectionManager>,
    options: Options,
    rng: Mutex<StdRng>,
    types: SyncMap<String, Arc<RegisteredType>>,
    subscriptions: SyncMap<String, Arc<SubscriptionMap>>,
    push_pool: PushPool,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        // Detach instead of joining: a worker still holding an upgraded
        // store reference would never let this drop run in the first
        // place, and the workers exit once the channel closes.
        self.push_pool.detach();
    }
}

/// A persistent, access-controlled, subscribable object store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Mints a fresh record id.
    #[must_use]
    pub fn new_id(&self) -> Id {
        let mut rng = self
            .inner
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Id::generate(&mut *rng)
    }

    /// Registers a record type: derives its schema, creates the table and
    /// indices (idempotent), and binds the control pair. Re-registration
    /// replaces the controls.
    pub fn register<T, Q, U>(&self, query_control: Q, update_control: U) -> StoreResult<()>
    where
        T: Record,
        Q: Fn(&View, &mut Query) -> StoreResult<()> + Send + Sync + 'static,
        U: Fn(&Update, Option<&T>, Option<&mut T>) -> StoreResult<()> + Send + Sync + 'static,
    {
        let schema = Schema::of::<T>()?;
        let ddl = schema.create_statements().join("\n");
        self.update(Caller::system(), |update| update.exec_batch(&ddl))?;
        let entry = Arc::new(RegisteredType {
            schema,
            query_control: Arc::new(query_control),
            update_control: erase_update_control::<T, U>(update_control),
        });
        self.inner.types.insert(T::type_name().to_string(), entry);
        Ok(())
    }

    pub(crate) fn registered(&self, type_name: &str) -> StoreResult<Arc<RegisteredType>> {
        self.inner
            .types
            .get(&type_name.to_string())
            .ok_or_else(|| StoreError::NotRegistered {
                type_name: type_name.to_string(),
            })
    }

    /// Runs `f` inside a read-only transaction.
    pub fn view<R>(
        &self,
        caller: Caller,
        f: impl FnOnce(&View) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let conn = self.inner.pool.get()?;
        let view = View::begin(conn, self.clone(), caller, false)?;
        let result = f(&view);
        // Read-only transactions always roll back.
        let _ = view.finish(false);
        result
    }

    /// Runs `f` inside a read/write transaction. An error return rolls the
    /// transaction back; success commits it and then notifies every
    /// subscription the transaction touched.
    pub fn update<R>(
        &self,
        caller: Caller,
        f: impl FnOnce(&Update) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let conn = self.inner.pool.get()?;
        let update = Update::begin(conn, self.clone(), caller)?;
        match f(&update) {
            Ok(value) => {
                update.finish(true)?;
                let touched = update.take_touched();
                drop(update);
                for subscription in touched.drain() {
                    self.inner.push_pool.submit(subscription);
                }
                Ok(value)
            }
            Err(err) => {
                let _ = update.finish(false);
                Err(err)
            }
        }
    }

    /// Opens a subscription on `T` under the given query.
    ///
    /// The caller identity is frozen into the subscription: every push
    /// re-executes the query as this caller. The initial push fires
    /// asynchronously right away. Queries with joins are not supported.
    pub fn subscribe<T, S>(
        &self,
        caller: Caller,
        query: &Query,
        sink: S,
    ) -> StoreResult<SubscriptionHandle>
    where
        T: Record,
        S: Subscriber<T>,
    {
        if !query.joins.is_empty() {
            return Err(StoreError::SubscribeUnsupported {
                reason: "join queries cannot be tracked across related mutations".to_string(),
            });
        }
        let mut query = query.clone();
        if query.set.is_none() {
            query.set = Some(Set::All);
        }
        let id = self.new_id();
        let subscription: Arc<dyn ErasedSubscription> =
            Arc::new(Subscription::<T, S>::new(id, query, caller, self, sink));
        self.subscriptions_for(T::type_name())
            .insert(id.to_hex(), Arc::clone(&subscription));
        self.inner.push_pool.submit(subscription);
        Ok(SubscriptionHandle::new(id, T::type_name(), self))
    }

    fn subscriptions_for(&self, type_name: &str) -> Arc<SubscriptionMap> {
        let (map, _) = self
            .inner
            .subscriptions
            .insert_if_absent(type_name.to_string(), Arc::new(SyncMap::new()));
        map
    }

    pub(crate) fn matching_subscriptions(
        &self,
        type_name: &str,
        record: &dyn Any,
    ) -> Vec<(String, Arc<dyn ErasedSubscription>)> {
        let Some(per_type) = self.inner.subscriptions.get(&type_name.to_string()) else {
            return Vec::new();
        };
        let mut matching = Vec::new();
        per_type.for_each(|key, subscription| {
            if subscription.matches(record) {
                matching.push((key.clone(), Arc::clone(subscription)));
            }
        });
        matching
    }

    pub(crate) fn remove_subscription(
        &self,
        type_name: &str,
        id_hex: &str,
    ) -> Option<Arc<dyn ErasedSubscription>> {
        self.inner
            .subscriptions
            .get(&type_name.to_string())?
            .remove(&id_hex.to_string())
    }

    /// Number of live subscriptions on a type.
    #[must_use]
    pub fn subscription_count(&self, type_name: &str) -> usize {
        self.inner
            .subscriptions
            .get(&type_name.to_string())
            .map_or(0, |per_type| per_type.len())
    }

    /// Shuts down push delivery, waiting for in-flight pushes to finish.
    /// Must not be called from inside a subscriber sink.
    pub fn close(&self) {
        self.inner.push_pool.shutdown();
        info!("store closed");
    }
}

/// Fixed pool of worker threads delivering subscription pushes. The feed
/// channel is unbounded so commits never block on slow subscribers.
struct PushPool {
    tx: Mutex<Option<Sender<Arc<dyn ErasedSubscription>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PushPool {
    fn start(workers: usize) -> Self {
        let (tx, rx) = unbounded::<Arc<dyn ErasedSubscription>>();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx: Receiver<Arc<dyn ErasedSubscription>> = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("rippledb-push-{index}"))
                .spawn(move || {
                    while let Ok(subscription) = rx.recv() {
                        subscription.push();
                    }
                })
                .expect("failed to spawn push worker");
            handles.push(handle);
        }
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    fn submit(&self, subscription: Arc<dyn ErasedSubscription>) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(subscription);
        }
    }

    fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn detach(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
