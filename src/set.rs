//! The predicate algebra.
//!
//! A [`Set`] describes the records matching given criteria. It projects to
//! a SQL WHERE condition, evaluates in memory against a record, and
//! supports three-valued reasoning about set relationships. The reasoning
//! is deliberately simplistic — it does not normalize criteria or compute
//! intersections — so [`Set::includes`] and [`Set::excludes`] return some
//! false negatives. They never return false positives.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::value::Value;

/// Comparison operator between a record field and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// Equal.
    #[serde(rename = "=")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=")]
    Ne,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
}

impl Comparator {
    /// SQL spelling of the operator.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// The comparator matching exactly the values this one rejects.
    #[must_use]
    pub const fn invert(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::Ge => Self::Lt,
            Self::Lt => Self::Ge,
        }
    }

    /// Applies the operator to two values.
    ///
    /// Strings and byte sequences compare lexicographically, booleans as
    /// `false < true`, integers numerically; an integer meeting a float is
    /// promoted. Anything else is [`StoreError::IncomparableTypes`].
    pub fn apply(self, left: &Value, right: &Value) -> StoreResult<bool> {
        let ordering = compare_values(left, right)?;
        Ok(match self {
            Self::Eq => ordering == std::cmp::Ordering::Equal,
            Self::Ne => ordering != std::cmp::Ordering::Equal,
            Self::Gt => ordering == std::cmp::Ordering::Greater,
            Self::Ge => ordering != std::cmp::Ordering::Less,
            Self::Lt => ordering == std::cmp::Ordering::Less,
            Self::Le => ordering != std::cmp::Ordering::Greater,
        })
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

fn incomparable(left: &Value, right: &Value) -> StoreError {
    StoreError::IncomparableTypes {
        left: left.kind_name(),
        right: right.kind_name(),
    }
}

fn compare_floats(left: f64, right: f64, a: &Value, b: &Value) -> StoreResult<std::cmp::Ordering> {
    left.partial_cmp(&right).ok_or_else(|| incomparable(a, b))
}

fn compare_values(a: &Value, b: &Value) -> StoreResult<std::cmp::Ordering> {
    match (a, b) {
        (Value::Text(left), Value::Text(right)) => Ok(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Ok(left.cmp(right)),
        (Value::Int(left), Value::Int(right)) => Ok(left.cmp(right)),
        (Value::Int(left), Value::Float(right)) => compare_floats(*left as f64, *right, a, b),
        (Value::Float(left), Value::Int(right)) => compare_floats(*left, *right as f64, a, b),
        (Value::Float(left), Value::Float(right)) => compare_floats(*left, *right, a, b),
        (Value::Bytes(left), Value::Bytes(right)) => Ok(left.cmp(right)),
        _ => Err(incomparable(a, b)),
    }
}

/// One cell of the comparator-pair implication table: how to decide, from
/// two operand literals, whether one condition implies (the negation of)
/// another on the same field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Implication {
    /// No implication can be drawn from the operands.
    Never,
    /// The implication holds iff `comparator` holds between the operands.
    Holds(Comparator),
    /// Like `Holds`, but over integers the operands shift by the deltas
    /// first (strict-to-non-strict conversion). Floats stay unshifted.
    HoldsShifted {
        comparator: Comparator,
        left_delta: i64,
        right_delta: i64,
    },
}

impl Implication {
    fn evaluate(self, left: &Value, right: &Value) -> StoreResult<bool> {
        match self {
            Self::Never => Ok(false),
            Self::Holds(comparator) => comparator.apply(left, right),
            Self::HoldsShifted {
                comparator,
                left_delta,
                right_delta,
            } => {
                if let (Value::Int(l), Value::Int(r)) = (left, right) {
                    match (l.checked_add(left_delta), r.checked_add(right_delta)) {
                        (Some(l), Some(r)) => comparator.apply(&Value::Int(l), &Value::Int(r)),
                        // Overflow: claim nothing.
                        _ => Ok(false),
                    }
                } else {
                    comparator.apply(left, right)
                }
            }
        }
    }
}

/// For conditions `x A a` and `x B b` on the same field, returns how to
/// decide `A implies B` and `A implies not B` from the operands `(a, b)`.
fn implications(a: Comparator, b: Comparator) -> (Implication, Implication) {
    use Comparator::{Eq, Ge, Gt, Le, Lt, Ne};
    use Implication::{Holds, HoldsShifted, Never};

    let shifted = |comparator, left_delta, right_delta| HoldsShifted {
        comparator,
        left_delta,
        right_delta,
    };

    match (a, b) {
        (Eq, Eq) => (Holds(Eq), Holds(Ne)),
        (Eq, Ne) => (Holds(Ne), Holds(Eq)),
        (Eq, Gt) => (Holds(Gt), Holds(Le)),
        (Eq, Ge) => (Holds(Ge), Holds(Lt)),
        (Eq, Lt) => (Holds(Lt), Holds(Ge)),
        (Eq, Le) => (Holds(Le), Holds(Gt)),

        (Ne, Eq) => (Never, Holds(Eq)),
        (Ne, Ne) => (Holds(Eq), Never),
        (Ne, Gt | Ge | Lt | Le) => (Never, Never),

        (Gt, Eq) => (Never, Holds(Ge)),
        (Gt, Ne) => (Holds(Ge), Never),
        (Gt, Gt) => (Holds(Ge), Never),
        (Gt, Ge) => (shifted(Ge, 1, 0), Never),
        (Gt, Lt) => (Never, shifted(Ge, 1, 0)),
        (Gt, Le) => (Never, Holds(Ge)),

        (Ge, Eq) => (Never, Holds(Gt)),
        (Ge, Ne) => (Holds(Gt), Never),
        (Ge, Gt) => (Holds(Gt), Never),
        (Ge, Ge) => (Holds(Ge), Never),
        (Ge, Lt) => (Never, Holds(Ge)),
        (Ge, Le) => (Never, Holds(Gt)),

        (Lt, Eq) => (Never, Holds(Le)),
        (Lt, Ne) => (Holds(Le), Never),
        (Lt, Gt) => (Never, shifted(Le, 0, 1)),
        (Lt, Ge) => (Never, Holds(Le)),
        (Lt, Lt) => (Holds(Le), Never),
        (Lt, Le) => (shifted(Le, 0, 1), Never),

        (Le, Eq) => (Never, Holds(Lt)),
        (Le, Ne) => (Holds(Lt), Never),
        (Le, Gt) => (Never, Holds(Le)),
        (Le, Ge) => (Never, Holds(Lt)),
        (Le, Lt) => (Holds(Lt), Never),
        (Le, Le) => (Holds(Le), Never),
    }
}

/// Atomic predicate: the set of records whose `field` compares to `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cond {
    /// Flattened column name.
    pub field: String,
    /// Comparison operator.
    pub comparator: Comparator,
    /// Literal to compare against.
    pub value: Value,
}

impl Cond {
    /// Builds a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparator,
            value: value.into(),
        }
    }

    fn excludes_cond(&self, other: &Cond) -> StoreResult<bool> {
        if self.field != other.field {
            return Ok(false);
        }
        let (_, implies_not_other) = implications(self.comparator, other.comparator);
        implies_not_other.evaluate(&self.value, &other.value)
    }

    fn includes_cond(&self, other: &Cond) -> StoreResult<bool> {
        if self.field != other.field {
            return Ok(false);
        }
        // other ⊆ self iff matching `other` implies matching `self`.
        let (implies_self, _) = implications(other.comparator, self.comparator);
        implies_self.evaluate(&other.value, &self.value)
    }

    fn invert(&self) -> Cond {
        Cond {
            field: self.field.clone(),
            comparator: self.comparator.invert(),
            value: self.value.clone(),
        }
    }
}

impl std::fmt::Display for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field, self.comparator, self.value)
    }
}

/// A definition of the records matching given criteria.
///
/// # Examples
///
/// ```
/// use rippledb::{Comparator, Set};
///
/// let wide = Set::cond("Rank", Comparator::Gt, 0);
/// let narrow = Set::cond("Rank", Comparator::Gt, 5);
/// assert!(wide.includes(&narrow).unwrap());
/// assert!(!narrow.includes(&wide).unwrap());
///
/// let window = Set::And(vec![wide, narrow]);
/// assert_eq!(
///     window.invert(),
///     Set::Or(vec![
///         Set::cond("Rank", Comparator::Le, 0),
///         Set::cond("Rank", Comparator::Le, 5),
///     ])
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Set {
    /// Matches everything.
    All,
    /// Matches nothing.
    None,
    /// Matches records whose field compares to a literal.
    Cond(Cond),
    /// Intersection of the contained sets.
    And(Vec<Set>),
    /// Union of the contained sets.
    Or(Vec<Set>),
}

impl Set {
    /// Convenience constructor for a [`Cond`] set.
    #[must_use]
    pub fn cond(field: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self::Cond(Cond::new(field, comparator, value))
    }

    /// Projects the set onto a WHERE condition against the (aliased) table,
    /// returning the SQL fragment and its bind parameters.
    pub(crate) fn to_where(&self, table: &str) -> (String, Vec<Value>) {
        match self {
            Self::All => ("1 = 1".to_string(), Vec::new()),
            Self::None => ("1 = 0".to_string(), Vec::new()),
            Self::Cond(cond) => (
                format!("\"{table}\".\"{}\" {} ?", cond.field, cond.comparator),
                vec![cond.value.clone()],
            ),
            Self::And(parts) if parts.is_empty() => Self::All.to_where(table),
            Self::Or(parts) if parts.is_empty() => Self::None.to_where(table),
            Self::And(parts) => Self::join_where(parts, table, " AND "),
            Self::Or(parts) => Self::join_where(parts, table, " OR "),
        }
    }

    fn join_where(parts: &[Set], table: &str, separator: &str) -> (String, Vec<Value>) {
        let mut fragments = Vec::with_capacity(parts.len());
        let mut params = Vec::new();
        for part in parts {
            let (sql, mut part_params) = part.to_where(table);
            fragments.push(format!("({sql})"));
            params.append(&mut part_params);
        }
        (fragments.join(separator), params)
    }

    /// Evaluates the set against a record in memory.
    ///
    /// `And` short-circuits on the first false child, `Or` on the first
    /// true one.
    pub fn matches<T: Record>(&self, record: &T) -> StoreResult<bool> {
        match self {
            Self::All => Ok(true),
            Self::None => Ok(false),
            Self::Cond(cond) => {
                let field_value = record.value_of(&cond.field).ok_or_else(|| {
                    StoreError::UnknownField {
                        field: cond.field.clone(),
                    }
                })?;
                cond.comparator.apply(&field_value, &cond.value)
            }
            Self::And(parts) => {
                for part in parts {
                    if !part.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.matches(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Returns true when it is guaranteed that this set and `other` have no
    /// intersection. False negatives are possible; false positives are not.
    pub fn excludes(&self, other: &Set) -> StoreResult<bool> {
        match self {
            Self::None => Ok(true),
            Self::All => Ok(matches!(other, Self::None)),
            Self::And(parts) => {
                for part in parts {
                    if part.excludes(other)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Or(parts) => {
                for part in parts {
                    if !part.excludes(other)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Cond(cond) => match other {
                Self::Cond(other_cond) => cond.excludes_cond(other_cond),
                Self::All => Ok(false),
                Self::None => Ok(true),
                Self::And(_) | Self::Or(_) => other.excludes(self),
            },
        }
    }

    /// Returns true when it is guaranteed that `other` is a subset of this
    /// set. False negatives are possible; false positives are not.
    pub fn includes(&self, other: &Set) -> StoreResult<bool> {
        match self {
            Self::All => Ok(true),
            Self::None => Ok(false),
            Self::And(parts) => {
                for part in parts {
                    if !part.includes(other)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(parts) => {
                for part in parts {
                    if part.includes(other)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Cond(cond) => match other {
                Self::Cond(other_cond) => cond.includes_cond(other_cond),
                // other ⊆ self iff ¬self excludes other.
                _ => self.invert().excludes(other),
            },
        }
    }

    /// Returns the complement of this set.
    #[must_use]
    pub fn invert(&self) -> Set {
        match self {
            Self::All => Self::None,
            Self::None => Self::All,
            Self::Cond(cond) => Self::Cond(cond.invert()),
            Self::And(parts) => Self::Or(parts.iter().map(Set::invert).collect()),
            Self::Or(parts) => Self::And(parts.iter().map(Set::invert).collect()),
        }
    }
}
