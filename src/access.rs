//! Callers and gatekeeping controls.
//!
//! Every transaction runs on behalf of a [`Caller`]. Registered types bind
//! two control predicates: a query control that may inspect and rewrite
//! queries before execution, and an update control that vets (and may
//! rewrite) mutations. System callers bypass both.

use std::any::Any;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::Query;
use crate::record::Record;
use crate::set::Set;
use crate::transaction::{Update, View};

/// The capability triple identifying who is calling the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    user_id: Option<Id>,
    admin: bool,
    system: bool,
}

impl Caller {
    /// The store's own identity. Bypasses all controls.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            user_id: None,
            admin: false,
            system: true,
        }
    }

    /// An unauthenticated caller with no user id and no privilege.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            user_id: None,
            admin: false,
            system: false,
        }
    }

    /// An authenticated user.
    #[must_use]
    pub const fn user(user_id: Id) -> Self {
        Self {
            user_id: Some(user_id),
            admin: false,
            system: false,
        }
    }

    /// Grants or revokes the admin flag.
    #[must_use]
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// The caller's user id, if authenticated.
    #[must_use]
    pub const fn user_id(&self) -> Option<Id> {
        self.user_id
    }

    /// Whether the caller holds the admin flag.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.admin
    }

    /// Whether the caller is the store itself.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.system
    }
}

/// Type-erased query control as held by the permission map.
pub(crate) type QueryControl =
    Arc<dyn Fn(&View, &mut Query) -> StoreResult<()> + Send + Sync>;

/// Type-erased update control as held by the permission map. `prev` and
/// `next` are the registered type behind `Any`.
pub(crate) type UpdateControl = Arc<
    dyn Fn(&Update, Option<&dyn Any>, Option<&mut dyn Any>) -> StoreResult<()> + Send + Sync,
>;

/// Erases a typed update control, downcasting at the call site.
pub(crate) fn erase_update_control<T, F>(control: F) -> UpdateControl
where
    T: 'static,
    F: Fn(&Update, Option<&T>, Option<&mut T>) -> StoreResult<()> + Send + Sync + 'static,
{
    Arc::new(move |update, prev, next| {
        let prev = match prev {
            Some(any) => Some(any.downcast_ref::<T>().ok_or_else(|| {
                StoreError::internal("update control invoked with a foreign previous value")
            })?),
            None => None,
        };
        let next = match next {
            Some(any) => Some(any.downcast_mut::<T>().ok_or_else(|| {
                StoreError::internal("update control invoked with a foreign next value")
            })?),
            None => None,
        };
        control(update, prev, next)
    })
}

/// A query control admitting every query unchanged.
pub fn uncontrolled_queries(_view: &View, _query: &mut Query) -> StoreResult<()> {
    Ok(())
}

/// An update control admitting every mutation unchanged.
pub fn uncontrolled_updates<T>(
    _update: &Update,
    _prev: Option<&T>,
    _next: Option<&mut T>,
) -> StoreResult<()> {
    Ok(())
}

/// Convenience for query controls: demands that the query's set is provably
/// a subset of `superset`, denying otherwise. An absent subset means
/// everything.
pub fn require_superset(superset: &Set, subset: Option<&Set>) -> StoreResult<()> {
    let subset = subset.unwrap_or(&Set::All);
    if superset.includes(subset)? {
        Ok(())
    } else {
        Err(StoreError::denied("query reaches outside the permitted set"))
    }
}

/// Convenience for controls: demands that the query returns at least one
/// row on the same transaction, denying otherwise. Typically used to
/// require membership ("the caller owns a row relating them to the
/// target") before admitting an operation.
pub fn require_results<T: Record>(view: &View, query: &Query) -> StoreResult<()> {
    let rows: Vec<T> = view.select(query)?;
    if rows.is_empty() {
        Err(StoreError::denied("required relation has no rows"))
    } else {
        Ok(())
    }
}
