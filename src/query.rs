//! Queries: a predicate plus result shaping.
//!
//! A [`Query`] bundles a [`Set`] with ordering, a limit, distinctness, and
//! one-level inner joins, and projects to a SELECT statement returning the
//! main table's columns.

use serde::{Deserialize, Serialize};

use crate::record::TypeDescriptor;
use crate::set::{Comparator, Set};
use crate::value::Value;

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Order {
    /// Flattened column name.
    pub field: String,
    /// Descending order when true.
    pub desc: bool,
}

impl Order {
    /// Ascending order on the field.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: false,
        }
    }

    /// Descending order on the field.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            desc: true,
        }
    }
}

/// One ON term of a join: a main-table column compared to a join-table
/// column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct On {
    /// Column on the queried table.
    pub main_field: String,
    /// Comparison operator.
    pub comparator: Comparator,
    /// Column on the joined table.
    pub join_field: String,
}

/// A secondary table constraining the result without contributing columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Descriptor of the joined type.
    pub descriptor: &'static TypeDescriptor,
    /// Predicate over the joined table. Absent means no rows qualify.
    pub set: Option<Set>,
    /// ON conditions tying the tables together.
    pub on: Vec<On>,
}

impl Join {
    /// Builds a join on the described type.
    #[must_use]
    pub fn new(descriptor: &'static TypeDescriptor, set: Option<Set>, on: Vec<On>) -> Self {
        Self {
            descriptor,
            set,
            on,
        }
    }

    fn to_on_condition(&self, main_table: &str, alias: &str) -> String {
        // An empty ON list degenerates to a cross join.
        if self.on.is_empty() {
            return "1 = 1".to_string();
        }
        let parts: Vec<String> = self
            .on
            .iter()
            .map(|on| {
                format!(
                    "\"{main_table}\".\"{}\" {} \"{alias}\".\"{}\"",
                    on.main_field, on.comparator, on.join_field
                )
            })
            .collect();
        parts.join(" AND ")
    }
}

/// Projects an optional set, falling back to the identity for the absent
/// variant (`All` for main conditions, `None` inside joins).
fn where_condition(set: Option<&Set>, table: &str, default: &Set) -> (String, Vec<Value>) {
    set.unwrap_or(default).to_where(table)
}

/// A set of records to return, in a particular amount and order.
///
/// # Examples
///
/// ```
/// use rippledb::{Comparator, Order, Query, Set};
///
/// let query = Query {
///     set: Some(Set::cond("Label", Comparator::Eq, "approved")),
///     limit: Some(10),
///     order: vec![Order::desc("Rank")],
///     ..Query::default()
/// };
/// assert!(!query.distinct);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Predicate; absent means everything.
    pub set: Option<Set>,
    /// Maximum number of rows; absent means no limit.
    pub limit: Option<u64>,
    /// SELECT DISTINCT when true.
    pub distinct: bool,
    /// ORDER BY terms.
    pub order: Vec<Order>,
    /// One-level inner joins.
    pub joins: Vec<Join>,
}

impl Query {
    /// A query over everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A query matching the given set.
    #[must_use]
    pub fn matching(set: Set) -> Self {
        Self {
            set: Some(set),
            ..Self::default()
        }
    }

    /// Projects the query onto a SELECT statement over the main table,
    /// returning the SQL and its bind parameters.
    pub(crate) fn to_select(&self, table: &str) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        sql.push_str(&format!("SELECT {distinct}\"{table}\".* FROM \"{table}\""));

        let (main_condition, mut params) = where_condition(self.set.as_ref(), table, &Set::All);
        let mut conditions = vec![main_condition];
        for (index, join) in self.joins.iter().enumerate() {
            let alias = format!("j{index}");
            sql.push_str(&format!(
                "\nJOIN \"{}\" {alias} ON {}",
                join.descriptor.name,
                join.to_on_condition(table, &alias)
            ));
            let (join_condition, mut join_params) =
                where_condition(join.set.as_ref(), &alias, &Set::None);
            conditions.push(join_condition);
            params.append(&mut join_params);
        }
        let wrapped: Vec<String> = conditions
            .into_iter()
            .map(|condition| format!("({condition})"))
            .collect();
        sql.push_str(&format!("\nWHERE {}", wrapped.join(" AND ")));

        if !self.order.is_empty() {
            let order_parts: Vec<String> = self
                .order
                .iter()
                .map(|order| {
                    let direction = if order.desc { "DESC" } else { "ASC" };
                    format!("\"{}\" {direction}", order.field)
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order_parts.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql.push(';');
        (sql, params)
    }
}
