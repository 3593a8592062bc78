//! The record contract.
//!
//! A record is a struct with a mandatory opaque `Id` stored under the
//! top-level column `ID`. Instead of runtime reflection, every registered
//! type carries a static [`TypeDescriptor`] naming its fields, and moves
//! column values in and out through [`Value`] slices in descriptor order.
//! Nested structs flatten into dotted column names (`Outer.Inner.Field`).

use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::value::Value;

/// The column name of the primary key on every record type.
pub const ID_COLUMN: &str = "ID";

/// Storage shape of a single descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean field.
    Bool,
    /// Signed or unsigned integer field of any width.
    Int,
    /// Floating-point field.
    Float,
    /// Text field.
    Text,
    /// Byte-sequence field ([`Id`] fields use this kind).
    Bytes,
    /// Optional field; unwraps one level and recurses.
    Nullable(&'static FieldKind),
    /// Nested struct; flattens into dotted column names.
    Nested(&'static TypeDescriptor),
}

/// One field of a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as it appears in column names.
    pub name: &'static str,
    /// Storage shape.
    pub kind: FieldKind,
    /// Whether to create a non-unique index on the column.
    pub indexed: bool,
    /// Whether to create a unique index on the column.
    pub unique: bool,
}

impl FieldDescriptor {
    /// Describes a plain field.
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            indexed: false,
            unique: false,
        }
    }

    /// Marks the column for a non-unique index.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Marks the column for a unique index.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Static description of a record type.
#[derive(Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type name; doubles as the table name.
    pub name: &'static str,
    /// Fields in declaration order.
    pub fields: &'static [FieldDescriptor],
    /// Multi-column uniqueness tuples (flattened column names).
    pub unique_groups: &'static [&'static [&'static str]],
}

/// A storable, subscribable record type.
///
/// Implementations are mechanical: the descriptor lists the fields, and the
/// three value methods move columns in descriptor order. See the test
/// records in `tests/` for the pattern.
pub trait Record: Clone + Send + Sync + Serialize + 'static {
    /// Static descriptor for the type.
    fn descriptor() -> &'static TypeDescriptor;

    /// The record's primary key.
    fn id(&self) -> Id;

    /// Column values in flattened descriptor order.
    fn values(&self) -> Vec<Value>;

    /// Rebuilds a record from column values in flattened descriptor order.
    fn from_values(values: Vec<Value>) -> StoreResult<Self>;

    /// Reads one column by its flattened (dotted) name.
    fn value_of(&self, column: &str) -> Option<Value>;

    /// The type's name; doubles as the table name.
    #[must_use]
    fn type_name() -> &'static str {
        Self::descriptor().name
    }
}

/// Sequential reader over a row's column values, for `from_values`
/// implementations.
#[derive(Debug)]
pub struct ValueCursor {
    iter: std::vec::IntoIter<Value>,
    position: usize,
}

impl ValueCursor {
    /// Wraps a value row.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            iter: values.into_iter(),
            position: 0,
        }
    }

    fn next_value(&mut self) -> StoreResult<Value> {
        self.position += 1;
        self.iter.next().ok_or_else(|| {
            StoreError::internal(format!("row ended before column {}", self.position))
        })
    }

    fn mismatch(&self, wanted: &'static str, got: &Value) -> StoreError {
        StoreError::internal(format!(
            "column {} holds {}, wanted {wanted}",
            self.position,
            got.kind_name(),
        ))
    }

    /// Reads the next column as a bool.
    pub fn bool(&mut self) -> StoreResult<bool> {
        match self.next_value()? {
            Value::Bool(v) => Ok(v),
            // SQLite reports BOOLEAN columns back as integers.
            Value::Int(v) => Ok(v != 0),
            other => Err(self.mismatch("bool", &other)),
        }
    }

    /// Reads the next column as an integer.
    pub fn int(&mut self) -> StoreResult<i64> {
        match self.next_value()? {
            Value::Int(v) => Ok(v),
            other => Err(self.mismatch("int", &other)),
        }
    }

    /// Reads the next column as a float.
    pub fn float(&mut self) -> StoreResult<f64> {
        match self.next_value()? {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(self.mismatch("float", &other)),
        }
    }

    /// Reads the next column as text.
    pub fn text(&mut self) -> StoreResult<String> {
        match self.next_value()? {
            Value::Text(v) => Ok(v),
            other => Err(self.mismatch("text", &other)),
        }
    }

    /// Reads the next column as bytes.
    pub fn bytes(&mut self) -> StoreResult<Vec<u8>> {
        match self.next_value()? {
            Value::Bytes(v) => Ok(v),
            other => Err(self.mismatch("bytes", &other)),
        }
    }

    /// Reads the next column as an [`Id`].
    pub fn id(&mut self) -> StoreResult<Id> {
        let bytes = self.bytes()?;
        let arr: [u8; crate::id::ID_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| StoreError::internal(format!("id blob of {} bytes", b.len())))?;
        Ok(Id::from_bytes(arr))
    }

    /// Reads the next column as an optional integer.
    pub fn nullable_int(&mut self) -> StoreResult<Option<i64>> {
        match self.next_value()? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(v)),
            other => Err(self.mismatch("int or null", &other)),
        }
    }

    /// Reads the next column as optional text.
    pub fn nullable_text(&mut self) -> StoreResult<Option<String>> {
        match self.next_value()? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v)),
            other => Err(self.mismatch("text or null", &other)),
        }
    }

    /// Reads the next column as an optional float.
    pub fn nullable_float(&mut self) -> StoreResult<Option<f64>> {
        match self.next_value()? {
            Value::Null => Ok(None),
            Value::Float(v) => Ok(Some(v)),
            Value::Int(v) => Ok(Some(v as f64)),
            other => Err(self.mismatch("float or null", &other)),
        }
    }

    /// Reads the next column as optional bytes.
    pub fn nullable_bytes(&mut self) -> StoreResult<Option<Vec<u8>>> {
        match self.next_value()? {
            Value::Null => Ok(None),
            Value::Bytes(v) => Ok(Some(v)),
            other => Err(self.mismatch("bytes or null", &other)),
        }
    }
}
