//! # rippledb — a subscribable object store
//!
//! rippledb persists typed records in SQLite, guards every read and write
//! behind per-type control predicates, and keeps long-lived subscriptions
//! fed: each one receives the initial result of its query and a fresh
//! materialization after every committed mutation that could change it.
//!
//! ## Core Concepts
//!
//! - **Record**: a struct with an opaque 32-byte `Id`, described by a
//!   static type descriptor
//! - **Set**: a closed predicate algebra with SQL projection, in-memory
//!   matching, and provable inclusion/exclusion reasoning
//! - **View / Update**: serializable read-only and read/write transactions
//! - **Caller**: the capability triple controls decide over
//! - **Subscription**: a persistent observer of one query's result set
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rippledb::{uncontrolled_queries, uncontrolled_updates, Options, Query};
//!
//! let store = Options::new("app.db").open()?;
//! store.register::<Message, _, _>(uncontrolled_queries, uncontrolled_updates)?;
//!
//! let caller = rippledb::Caller::system();
//! store.update(caller, |u| u.insert(&mut message))?;
//! store.subscribe::<Message, _>(caller, &Query::all(), |batch| {
//!     println!("{batch:?}");
//!     Ok(())
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod access;
pub mod error;
pub mod gateway;
pub mod id;
pub mod query;
pub mod record;
pub mod schema;
pub mod set;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod transaction;
pub mod value;

// Re-export primary types at crate root for convenience
pub use access::{
    require_results, require_superset, uncontrolled_queries, uncontrolled_updates, Caller,
};
pub use error::{StoreError, StoreResult};
pub use id::{Id, ParseIdError, ID_LEN};
pub use query::{Join, On, Order, Query};
pub use record::{FieldDescriptor, FieldKind, Record, TypeDescriptor, ValueCursor, ID_COLUMN};
pub use schema::{ColumnKind, ColumnSpec, Schema};
pub use set::{Comparator, Cond, Set};
pub use store::{Options, Store};
pub use subscription::{Subscriber, SubscriptionHandle};
pub use transaction::{Update, View};
pub use value::Value;
