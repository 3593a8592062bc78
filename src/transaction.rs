//! Read-only and read/write transactions.
//!
//! A [`View`] wraps one pooled connection inside a SQLite transaction
//! (serializable by the backend's nature); an [`Update`] adds the mutating
//! operations and the per-transaction set of subscriptions to notify after
//! commit. Handles are single-threaded by construction and must not be
//! shared across threads.
//!
//! Control predicates run before every controlled operation. While one
//! runs, a flag on the view suppresses nested control invocations, so
//! controls can freely issue reads (and writes) on the same transaction
//! without recursing into themselves. Internal pre-image loads use the
//! unchecked path, which is the same machinery the system caller gets.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ops::Deref;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use tracing::{debug, warn};

use crate::access::Caller;
use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::Query;
use crate::record::{Record, ID_COLUMN};
use crate::set::{Comparator, Set};
use crate::store::{RegisteredType, Store};
use crate::subscription::SubscriptionSet;
use crate::value::Value;

/// Restores the control-suppression flag when a control predicate returns,
/// normally or through an error.
struct SuppressGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> SuppressGuard<'a> {
    fn engage(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// A read-only transaction.
pub struct View {
    conn: PooledConnection<SqliteConnectionManager>,
    store: Store,
    caller: Caller,
    suppress_controls: Cell<bool>,
    finished: Cell<bool>,
}

impl View {
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        store: Store,
        caller: Caller,
        writable: bool,
    ) -> StoreResult<Self> {
        let begin = if writable { "BEGIN IMMEDIATE" } else { "BEGIN" };
        conn.execute_batch(begin)?;
        Ok(Self {
            conn,
            store,
            caller,
            suppress_controls: Cell::new(false),
            finished: Cell::new(false),
        })
    }

    /// The caller this transaction runs on behalf of.
    #[must_use]
    pub fn caller(&self) -> Caller {
        self.caller
    }

    /// Executes the query and returns the matching records.
    ///
    /// The type's query control runs first and may rewrite the (cloned)
    /// query; the caller's own query is never modified.
    pub fn select<T: Record>(&self, query: &Query) -> StoreResult<Vec<T>> {
        let registered = self.store.registered(T::type_name())?;
        let mut effective = query.clone();
        self.apply_query_control(&registered, &mut effective)?;
        self.run_select(&registered, &effective)
    }

    /// Reads the record with the given id.
    ///
    /// Builds a single-row query on the primary key, runs it through the
    /// type's query control (which may rewrite it), and executes the
    /// result. A query rewritten away from the row yields `NotFound`.
    pub fn get<T: Record>(&self, id: Id) -> StoreResult<T> {
        let registered = self.store.registered(T::type_name())?;
        let mut query = Self::primary_key_query(id);
        self.apply_query_control(&registered, &mut query)?;
        self.first_row(&registered, &query)
    }

    fn primary_key_query(id: Id) -> Query {
        Query {
            set: Some(Set::cond(ID_COLUMN, Comparator::Eq, id)),
            limit: Some(1),
            ..Query::default()
        }
    }

    /// Select without control checks. Used for internal pre-image loads,
    /// which run with the store's own privileges.
    pub(crate) fn get_unchecked<T: Record>(&self, id: Id) -> StoreResult<T> {
        let registered = self.store.registered(T::type_name())?;
        self.first_row(&registered, &Self::primary_key_query(id))
    }

    fn first_row<T: Record>(&self, registered: &RegisteredType, query: &Query) -> StoreResult<T> {
        self.run_select(registered, query)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found(T::type_name()))
    }

    fn apply_query_control(
        &self,
        registered: &RegisteredType,
        query: &mut Query,
    ) -> StoreResult<()> {
        if self.caller.is_system() || self.suppress_controls.get() {
            return Ok(());
        }
        let _guard = SuppressGuard::engage(&self.suppress_controls);
        (registered.query_control)(self, query)
    }

    fn run_select<T: Record>(
        &self,
        registered: &RegisteredType,
        query: &Query,
    ) -> StoreResult<Vec<T>> {
        let (sql, params) = query.to_select(registered.schema.type_name());
        let result = self.query_rows::<T>(registered, &sql, &params);
        if self.store.options().log_queries {
            match &result {
                Ok(rows) => debug!(target: "rippledb::sql", sql = %sql, rows = rows.len(), "QUERY"),
                Err(err) => debug!(target: "rippledb::sql", sql = %sql, error = %err, "QUERY"),
            }
        }
        result
    }

    fn query_rows<T: Record>(
        &self,
        registered: &RegisteredType,
        sql: &str,
        params: &[Value],
    ) -> StoreResult<Vec<T>> {
        let mut statement = self.conn.prepare(sql)?;
        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let values = registered.schema.decode_row(row)?;
            results.push(T::from_values(values)?);
        }
        Ok(results)
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn finish(&self, commit: bool) -> StoreResult<()> {
        if self.finished.get() {
            return Ok(());
        }
        let sql = if commit { "COMMIT" } else { "ROLLBACK" };
        let result = self.conn.execute_batch(sql);
        if result.is_err() && commit {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        self.finished.set(true);
        result.map_err(StoreError::from)
    }
}

impl Drop for View {
    fn drop(&mut self) {
        if !self.finished.get() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback on drop failed");
            }
        }
    }
}

/// A read/write transaction.
pub struct Update {
    view: View,
    touched: RefCell<SubscriptionSet>,
}

impl Deref for Update {
    type Target = View;

    fn deref(&self) -> &View {
        &self.view
    }
}

impl Update {
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        store: Store,
        caller: Caller,
    ) -> StoreResult<Self> {
        Ok(Self {
            view: View::begin(conn, store, caller, true)?,
            touched: RefCell::new(SubscriptionSet::new()),
        })
    }

    /// Places the record at its id.
    ///
    /// The type's update control runs as `(None, Some(record))` and may
    /// rewrite the record before it is written. A duplicate primary key or
    /// uniqueness violation yields `Conflict`.
    pub fn insert<T: Record>(&self, record: &mut T) -> StoreResult<()> {
        let registered = self.store().registered(T::type_name())?;
        self.apply_update_control(&registered, None, Some(&mut *record as &mut dyn Any))?;
        let values = record.values();
        registered.schema.check_width(&values)?;
        self.exec(&registered.schema.insert_statement(), &values)?;
        self.merge_matching(record);
        Ok(())
    }

    /// Replaces the record at its id.
    ///
    /// Loads the current row, runs the update control as
    /// `(Some(current), Some(record))`, and executes the update. A missing
    /// row yields `NotFound`.
    pub fn update<T: Record>(&self, record: &mut T) -> StoreResult<()> {
        let registered = self.store().registered(T::type_name())?;
        let previous: T = self.get_unchecked(record.id())?;
        self.merge_matching(&previous);
        self.apply_update_control(
            &registered,
            Some(&previous as &dyn Any),
            Some(&mut *record as &mut dyn Any),
        )?;
        let id = record.id();
        let params = registered
            .schema
            .update_params(record.values(), Value::from(id))?;
        self.exec(&registered.schema.update_statement(), &params)?;
        self.merge_matching(record);
        Ok(())
    }

    /// Removes the record at its id.
    ///
    /// Loads the current row and runs the update control as
    /// `(Some(current), None)` before deleting.
    pub fn remove<T: Record>(&self, record: &T) -> StoreResult<()> {
        let registered = self.store().registered(T::type_name())?;
        let previous: T = self.get_unchecked(record.id())?;
        self.merge_matching(&previous);
        self.apply_update_control(&registered, Some(&previous as &dyn Any), None)?;
        self.exec(
            &registered.schema.delete_statement(),
            &[Value::from(record.id())],
        )?;
        Ok(())
    }

    fn apply_update_control(
        &self,
        registered: &RegisteredType,
        prev: Option<&dyn Any>,
        next: Option<&mut dyn Any>,
    ) -> StoreResult<()> {
        if self.caller().is_system() || self.view.suppress_controls.get() {
            return Ok(());
        }
        let _guard = SuppressGuard::engage(&self.view.suppress_controls);
        (registered.update_control)(self, prev, next)
    }

    fn merge_matching<T: Record>(&self, record: &T) {
        let matching = self
            .store()
            .matching_subscriptions(T::type_name(), record as &dyn Any);
        self.touched.borrow_mut().merge(matching);
    }

    fn exec(&self, sql: &str, params: &[Value]) -> StoreResult<()> {
        let result = self
            .view
            .conn
            .execute(sql, params_from_iter(params.iter()));
        if self.store().options().log_statements {
            match &result {
                Ok(rows) => debug!(target: "rippledb::sql", sql = %sql, rows = *rows, "EXEC"),
                Err(err) => debug!(target: "rippledb::sql", sql = %sql, error = %err, "EXEC"),
            }
        }
        result?;
        Ok(())
    }

    /// Executes raw DDL. Only registration uses this.
    pub(crate) fn exec_batch(&self, sql: &str) -> StoreResult<()> {
        let result = self.view.conn.execute_batch(sql);
        if self.store().options().log_statements {
            match &result {
                Ok(()) => debug!(target: "rippledb::sql", sql = %sql, "EXEC"),
                Err(err) => debug!(target: "rippledb::sql", sql = %sql, error = %err, "EXEC"),
            }
        }
        result.map_err(StoreError::from)
    }

    pub(crate) fn take_touched(&self) -> SubscriptionSet {
        self.touched.take()
    }

    pub(crate) fn finish(&self, commit: bool) -> StoreResult<()> {
        self.view.finish(commit)
    }
}
