//! Shared fixtures for the end-to-end suites: on-disk stores and a few
//! record types exercising every descriptor shape.

#![allow(dead_code)]

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use rippledb::{
    FieldDescriptor, FieldKind, Id, Options, Record, Store, StoreResult, TypeDescriptor, Value,
    ValueCursor,
};

/// How long to wait for an expected subscription push.
pub const PUSH_WAIT: Duration = Duration::from_secs(5);
/// How long to wait before concluding no push is coming.
pub const NO_PUSH_WAIT: Duration = Duration::from_millis(200);

pub fn open_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut options = Options::new(dir.path().join("store.db"));
    options.random_seed = Some(0x5eed);
    if std::env::var("VERBOSE_RIPPLEDB").is_ok() {
        options.log_queries = true;
        options.log_statements = true;
        let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();
    }
    let store = options.open().expect("open store");
    (store, dir)
}

/// A sink forwarding successful pushes into a channel. Load errors panic
/// the test.
pub fn channel_sink<T: Record>(
) -> (
    Receiver<Vec<T>>,
    impl Fn(StoreResult<Vec<T>>) -> StoreResult<()> + Send + Sync + 'static,
) {
    let (tx, rx) = bounded::<Vec<T>>(16);
    let sink = move |outcome: StoreResult<Vec<T>>| {
        let batch = outcome.expect("subscription load");
        tx.send(batch).expect("test channel");
        Ok(())
    };
    (rx, sink)
}

pub fn ids_of<T: Record>(records: &[T]) -> Vec<Id> {
    records.iter().map(Record::id).collect()
}

pub fn assert_contains_exactly<T: Record>(records: &[T], expected: &[Id]) {
    let mut got: Vec<String> = records.iter().map(|r| r.id().to_hex()).collect();
    let mut want: Vec<String> = expected.iter().map(Id::to_hex).collect();
    got.sort();
    want.sort();
    assert_eq!(got, want, "result set mismatch");
}

pub fn assert_lists_exactly<T: Record>(records: &[T], expected: &[Id]) {
    let got: Vec<String> = records.iter().map(|r| r.id().to_hex()).collect();
    let want: Vec<String> = expected.iter().map(Id::to_hex).collect();
    assert_eq!(got, want, "result order mismatch");
}

// --- Gadget: the general-purpose record, one field per descriptor shape.

static DETAIL_DESCRIPTOR: TypeDescriptor = TypeDescriptor {
    name: "Detail",
    fields: &[FieldDescriptor::new("Weight", FieldKind::Float)],
    unique_groups: &[],
};

static GADGET_DESCRIPTOR: TypeDescriptor = TypeDescriptor {
    name: "Gadget",
    fields: &[
        FieldDescriptor::new("ID", FieldKind::Bytes),
        FieldDescriptor::new("Label", FieldKind::Text),
        FieldDescriptor::new("Rank", FieldKind::Int).indexed(),
        FieldDescriptor::new("Active", FieldKind::Bool).indexed(),
        FieldDescriptor::new("Note", FieldKind::Nullable(&FieldKind::Text)),
        FieldDescriptor::new("Payload", FieldKind::Bytes),
        FieldDescriptor::new("Detail", FieldKind::Nested(&DETAIL_DESCRIPTOR)),
    ],
    unique_groups: &[],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    pub id: Id,
    pub label: String,
    pub rank: i64,
    pub active: bool,
    pub note: Option<String>,
    pub payload: Vec<u8>,
    pub detail: Detail,
}

impl Record for Gadget {
    fn descriptor() -> &'static TypeDescriptor {
        &GADGET_DESCRIPTOR
    }

    fn id(&self) -> Id {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.label.clone().into(),
            self.rank.into(),
            self.active.into(),
            self.note.clone().into(),
            self.payload.clone().into(),
            self.detail.weight.into(),
        ]
    }

    fn from_values(values: Vec<Value>) -> StoreResult<Self> {
        let mut cursor = ValueCursor::new(values);
        Ok(Self {
            id: cursor.id()?,
            label: cursor.text()?,
            rank: cursor.int()?,
            active: cursor.bool()?,
            note: cursor.nullable_text()?,
            payload: cursor.bytes()?,
            detail: Detail {
                weight: cursor.float()?,
            },
        })
    }

    fn value_of(&self, column: &str) -> Option<Value> {
        match column {
            "ID" => Some(self.id.into()),
            "Label" => Some(self.label.clone().into()),
            "Rank" => Some(self.rank.into()),
            "Active" => Some(self.active.into()),
            "Note" => Some(self.note.clone().into()),
            "Payload" => Some(self.payload.clone().into()),
            "Detail.Weight" => Some(self.detail.weight.into()),
            _ => None,
        }
    }
}

impl Gadget {
    pub fn new(store: &Store, label: &str, rank: i64) -> Self {
        Self {
            id: store.new_id(),
            label: label.to_string(),
            rank,
            ..Self::default()
        }
    }
}

// --- Document: the access-controlled record for ownership scenarios.

static DOCUMENT_DESCRIPTOR: TypeDescriptor = TypeDescriptor {
    name: "Document",
    fields: &[
        FieldDescriptor::new("ID", FieldKind::Bytes),
        FieldDescriptor::new("OwnerID", FieldKind::Bytes).indexed(),
        FieldDescriptor::new("Label", FieldKind::Text),
    ],
    unique_groups: &[],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Id,
    pub owner_id: Id,
    pub label: String,
}

impl Record for Document {
    fn descriptor() -> &'static TypeDescriptor {
        &DOCUMENT_DESCRIPTOR
    }

    fn id(&self) -> Id {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.owner_id.into(),
            self.label.clone().into(),
        ]
    }

    fn from_values(values: Vec<Value>) -> StoreResult<Self> {
        let mut cursor = ValueCursor::new(values);
        Ok(Self {
            id: cursor.id()?,
            owner_id: cursor.id()?,
            label: cursor.text()?,
        })
    }

    fn value_of(&self, column: &str) -> Option<Value> {
        match column {
            "ID" => Some(self.id.into()),
            "OwnerID" => Some(self.owner_id.into()),
            "Label" => Some(self.label.clone().into()),
            _ => None,
        }
    }
}

// --- Account: single-column and multi-column uniqueness.

static ACCOUNT_DESCRIPTOR: TypeDescriptor = TypeDescriptor {
    name: "Account",
    fields: &[
        FieldDescriptor::new("ID", FieldKind::Bytes),
        FieldDescriptor::new("Alias", FieldKind::Text).unique(),
        FieldDescriptor::new("Realm", FieldKind::Text),
        FieldDescriptor::new("Handle", FieldKind::Text),
    ],
    unique_groups: &[&["Realm", "Handle"]],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub alias: String,
    pub realm: String,
    pub handle: String,
}

impl Record for Account {
    fn descriptor() -> &'static TypeDescriptor {
        &ACCOUNT_DESCRIPTOR
    }

    fn id(&self) -> Id {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.alias.clone().into(),
            self.realm.clone().into(),
            self.handle.clone().into(),
        ]
    }

    fn from_values(values: Vec<Value>) -> StoreResult<Self> {
        let mut cursor = ValueCursor::new(values);
        Ok(Self {
            id: cursor.id()?,
            alias: cursor.text()?,
            realm: cursor.text()?,
            handle: cursor.text()?,
        })
    }

    fn value_of(&self, column: &str) -> Option<Value> {
        match column {
            "ID" => Some(self.id.into()),
            "Alias" => Some(self.alias.clone().into()),
            "Realm" => Some(self.realm.clone().into()),
            "Handle" => Some(self.handle.clone().into()),
            _ => None,
        }
    }
}
