//! Schema derivation: from type descriptor to table shape.
//!
//! Walks a record type's descriptor, flattening nested structs into dotted
//! column names and mapping field kinds onto storage kinds. The result
//! carries everything the store needs to create the table, build DML, and
//! decode rows. Malformed descriptors (no `ID`, unsupported shapes, cyclic
//! nesting) are rejected with `InvalidRecordType`.

use crate::error::{StoreError, StoreResult};
use crate::record::{FieldKind, Record, TypeDescriptor, ID_COLUMN};
use crate::value::Value;

/// Storage kind of a derived column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Boolean storage.
    Boolean,
    /// Integer storage.
    Integer,
    /// Floating-point storage.
    Real,
    /// Text storage.
    Text,
    /// Byte-sequence storage.
    Blob,
}

impl ColumnKind {
    /// SQL type name for CREATE TABLE.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// One derived column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Flattened (dotted) column name.
    pub name: String,
    /// Storage kind.
    pub kind: ColumnKind,
    /// Whether the column admits NULL.
    pub nullable: bool,
    /// Whether to create a non-unique index.
    pub indexed: bool,
    /// Whether to create a unique index.
    pub unique: bool,
}

/// Derived table shape of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    type_name: &'static str,
    columns: Vec<ColumnSpec>,
    unique_groups: &'static [&'static [&'static str]],
}

impl Schema {
    /// Derives the schema for a record type.
    pub fn of<T: Record>() -> StoreResult<Self> {
        Self::derive(T::descriptor())
    }

    /// Derives the schema from a descriptor.
    pub fn derive(descriptor: &'static TypeDescriptor) -> StoreResult<Self> {
        let mut columns = Vec::new();
        let mut visiting = vec![descriptor.name];
        flatten_fields(descriptor, "", false, &mut visiting, &mut columns)?;

        let invalid =
            |reason: &str| StoreError::invalid_record_type(descriptor.name, reason.to_string());

        match columns.iter().position(|column| column.name == ID_COLUMN) {
            Some(position) => {
                let id = &columns[position];
                if id.kind != ColumnKind::Blob || id.nullable {
                    return Err(invalid("the ID field must be a non-nullable Id"));
                }
            }
            None => return Err(invalid("missing top-level ID field of type Id")),
        }

        for window_start in 0..columns.len() {
            let name = &columns[window_start].name;
            if columns[window_start + 1..].iter().any(|c| &c.name == name) {
                return Err(StoreError::invalid_record_type(
                    descriptor.name,
                    format!("duplicate column {name:?}"),
                ));
            }
        }

        for group in descriptor.unique_groups {
            for column in *group {
                if !columns.iter().any(|c| c.name == *column) {
                    return Err(StoreError::invalid_record_type(
                        descriptor.name,
                        format!("unique group names unknown column {column:?}"),
                    ));
                }
            }
        }

        Ok(Self {
            type_name: descriptor.name,
            columns,
            unique_groups: descriptor.unique_groups,
        })
    }

    /// The type (and table) name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Derived columns in descriptor order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// The idempotent CREATE TABLE / CREATE INDEX statements.
    #[must_use]
    pub fn create_statements(&self) -> Vec<String> {
        let mut column_lines: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("  \"{}\" {}", column.name, column.kind.sql_type()))
            .collect();
        column_lines.push(format!("  PRIMARY KEY (\"{ID_COLUMN}\")"));
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n{}\n);",
            self.type_name,
            column_lines.join(",\n")
        )];

        for column in &self.columns {
            if column.indexed || column.unique {
                let unique = if column.unique { " UNIQUE" } else { "" };
                statements.push(format!(
                    "CREATE{unique} INDEX IF NOT EXISTS \"{table}.{col}\" ON \"{table}\" (\"{col}\");",
                    table = self.type_name,
                    col = column.name,
                ));
            }
        }
        for group in self.unique_groups {
            let quoted: Vec<String> = group.iter().map(|c| format!("\"{c}\"")).collect();
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"{table}.{name}\" ON \"{table}\" ({columns});",
                table = self.type_name,
                name = group.join("_"),
                columns = quoted.join(", "),
            ));
        }
        statements
    }

    /// INSERT statement covering every column.
    #[must_use]
    pub fn insert_statement(&self) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("\"{}\"", column.name))
            .collect();
        let placeholders: Vec<&str> = self.columns.iter().map(|_| "?").collect();
        format!(
            "INSERT INTO \"{}\"\n  ({}) VALUES\n  ({});",
            self.type_name,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    /// UPDATE statement covering every non-key column, keyed by id.
    #[must_use]
    pub fn update_statement(&self) -> String {
        let assignments: Vec<String> = self
            .columns
            .iter()
            .filter(|column| column.name != ID_COLUMN)
            .map(|column| format!("  \"{}\" = ?", column.name))
            .collect();
        format!(
            "UPDATE \"{}\" SET\n{}\nWHERE \"{ID_COLUMN}\" = ?;",
            self.type_name,
            assignments.join(",\n")
        )
    }

    /// DELETE statement keyed by id.
    #[must_use]
    pub fn delete_statement(&self) -> String {
        format!(
            "DELETE FROM \"{}\" WHERE \"{ID_COLUMN}\" = ?;",
            self.type_name
        )
    }

    /// Orders a record's values for the UPDATE statement: non-key columns
    /// first, then the id.
    pub fn update_params(&self, values: Vec<Value>, id: Value) -> StoreResult<Vec<Value>> {
        self.check_width(&values)?;
        let mut params: Vec<Value> = self
            .columns
            .iter()
            .zip(values)
            .filter(|(column, _)| column.name != ID_COLUMN)
            .map(|(_, value)| value)
            .collect();
        params.push(id);
        Ok(params)
    }

    /// Validates a value row against the column count.
    pub fn check_width(&self, values: &[Value]) -> StoreResult<()> {
        if values.len() == self.columns.len() {
            Ok(())
        } else {
            Err(StoreError::internal(format!(
                "{} produced {} values for {} columns",
                self.type_name,
                values.len(),
                self.columns.len()
            )))
        }
    }

    /// Decodes one backend row into column values in descriptor order.
    pub fn decode_row(&self, row: &rusqlite::Row<'_>) -> StoreResult<Vec<Value>> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (index, column) in self.columns.iter().enumerate() {
            let value = match column.kind {
                ColumnKind::Boolean => row
                    .get::<_, Option<bool>>(index)?
                    .map_or(Value::Null, Value::Bool),
                ColumnKind::Integer => row
                    .get::<_, Option<i64>>(index)?
                    .map_or(Value::Null, Value::Int),
                ColumnKind::Real => row
                    .get::<_, Option<f64>>(index)?
                    .map_or(Value::Null, Value::Float),
                ColumnKind::Text => row
                    .get::<_, Option<String>>(index)?
                    .map_or(Value::Null, Value::Text),
                ColumnKind::Blob => row
                    .get::<_, Option<Vec<u8>>>(index)?
                    .map_or(Value::Null, Value::Bytes),
            };
            values.push(value);
        }
        Ok(values)
    }
}

fn flatten_fields(
    descriptor: &'static TypeDescriptor,
    prefix: &str,
    nullable: bool,
    visiting: &mut Vec<&'static str>,
    columns: &mut Vec<ColumnSpec>,
) -> StoreResult<()> {
    for field in descriptor.fields {
        let name = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}{}", field.name)
        };
        flatten_kind(&field.kind, field.indexed, field.unique, name, nullable, visiting, columns)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn flatten_kind(
    kind: &FieldKind,
    indexed: bool,
    unique: bool,
    name: String,
    nullable: bool,
    visiting: &mut Vec<&'static str>,
    columns: &mut Vec<ColumnSpec>,
) -> StoreResult<()> {
    let simple = |kind: ColumnKind, name: String, columns: &mut Vec<ColumnSpec>| {
        columns.push(ColumnSpec {
            name,
            kind,
            nullable,
            indexed,
            unique,
        });
    };
    match kind {
        FieldKind::Bool => simple(ColumnKind::Boolean, name, columns),
        FieldKind::Int => simple(ColumnKind::Integer, name, columns),
        FieldKind::Float => simple(ColumnKind::Real, name, columns),
        FieldKind::Text => simple(ColumnKind::Text, name, columns),
        FieldKind::Bytes => simple(ColumnKind::Blob, name, columns),
        FieldKind::Nullable(inner) => {
            flatten_kind(inner, indexed, unique, name, true, visiting, columns)?;
        }
        FieldKind::Nested(nested) => {
            if visiting.contains(&nested.name) {
                return Err(StoreError::invalid_record_type(
                    visiting[0],
                    format!("cyclic nesting through {}", nested.name),
                ));
            }
            visiting.push(nested.name);
            flatten_fields(nested, &format!("{name}."), nullable, visiting, columns)?;
            visiting.pop();
        }
    }
    Ok(())
}
