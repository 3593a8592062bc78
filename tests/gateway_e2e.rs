//! Gateway sessions end to end: identity, subscriptions, mutations, and
//! envelope validation, with a channel standing in for the transport.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use common::{open_store, Gadget, NO_PUSH_WAIT, PUSH_WAIT};
use crossbeam_channel::{unbounded, Receiver};
use rippledb::gateway::{
    AnonymousIdentifier, Gateway, Identifier, Identity, Match, Message, MutateRequest, Session,
    SubscribeRequest, Unsubscribe,
};
use rippledb::{
    uncontrolled_queries, uncontrolled_updates, Caller, Comparator, Cond, Id, StoreError,
    StoreResult,
};

/// Transport stand-in: outbound messages land in a channel, with a buffer
/// for out-of-order inspection (acknowledgements and pushes race).
struct Conn {
    rx: Receiver<Message>,
    pending: Mutex<Vec<Message>>,
}

impl Conn {
    fn await_where(&self, describe: &str, pred: impl Fn(&Message) -> bool) -> Message {
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(index) = pending.iter().position(|message| pred(message)) {
                return pending.remove(index);
            }
        }
        let deadline = Instant::now() + PUSH_WAIT;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {describe}"));
            let message = self
                .rx
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("timed out waiting for {describe}"));
            if pred(&message) {
                return message;
            }
            self.pending.lock().unwrap().push(message);
        }
    }

    fn outcome_for(&self, cause: Id) -> rippledb::gateway::Outcome {
        self.await_where("an outcome", |message| {
            message
                .outcome
                .as_ref()
                .is_some_and(|outcome| outcome.cause_message_id == cause)
        })
        .outcome
        .unwrap()
    }

    fn data_for(&self, cause: Id) -> rippledb::gateway::Data {
        self.await_where("a data push", |message| {
            message
                .data
                .as_ref()
                .is_some_and(|data| data.cause_message_id == cause)
        })
        .data
        .unwrap()
    }

    fn assert_no_data_for(&self, cause: Id) {
        let pending_hit = self
            .pending
            .lock()
            .unwrap()
            .iter()
            .any(|message| {
                message
                    .data
                    .as_ref()
                    .is_some_and(|data| data.cause_message_id == cause)
            });
        assert!(!pending_hit, "unexpected buffered data push");
        while let Ok(message) = self.rx.recv_timeout(NO_PUSH_WAIT) {
            if let Some(data) = &message.data {
                assert_ne!(data.cause_message_id, cause, "unexpected data push");
            }
            self.pending.lock().unwrap().push(message);
        }
    }
}

fn connect(gateway: &Gateway) -> (Session, Arc<Conn>) {
    let (tx, rx) = unbounded::<Message>();
    let sender = move |message: Message| -> StoreResult<()> {
        tx.send(message)
            .map_err(|_| StoreError::backend("connection gone"))
    };
    let session = Session::new(gateway.clone(), Arc::new(sender));
    (
        session,
        Arc::new(Conn {
            rx,
            pending: Mutex::new(Vec::new()),
        }),
    )
}

fn message_id(byte: u8) -> Id {
    Id::from_bytes([byte; 32])
}

fn open_gateway() -> (Gateway, tempfile::TempDir) {
    let (store, dir) = open_store();
    let gateway = Gateway::new(store, Arc::new(AnonymousIdentifier));
    gateway
        .register::<Gadget, _, _>(uncontrolled_queries, uncontrolled_updates)
        .unwrap();
    (gateway, dir)
}

fn decode_batch(data: &rippledb::gateway::Data) -> Vec<Gadget> {
    assert_eq!(data.error, None);
    serde_json::from_slice(&data.payload).unwrap()
}

#[test]
fn subscribe_mutate_unsubscribe_flow() {
    let (gateway, _dir) = open_gateway();
    let (session, conn) = connect(&gateway);

    // Subscribe to label == "x".
    let subscribe_id = message_id(1);
    session
        .handle(&Message {
            id: subscribe_id,
            subscribe: Some(SubscribeRequest {
                type_name: "Gadget".to_string(),
                criteria: Match {
                    cond: Some(Cond::new("Label", Comparator::Eq, "x")),
                    ..Match::default()
                },
                ..SubscribeRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(subscribe_id).error, None);
    // Initial push carries the empty result.
    assert!(decode_batch(&conn.data_for(subscribe_id)).is_empty());

    // Insert a matching record over the wire.
    let gadget = Gadget {
        id: gateway.store().new_id(),
        label: "x".to_string(),
        rank: 1,
        ..Gadget::default()
    };
    let mutate_id = message_id(2);
    session
        .handle(&Message {
            id: mutate_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                insert: Some(serde_json::to_vec(&gadget).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(mutate_id).error, None);
    let batch = decode_batch(&conn.data_for(subscribe_id));
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, gadget.id);
    assert_eq!(batch[0].label, "x");

    // Unsubscribe, then further matching inserts push nothing.
    let unsubscribe_id = message_id(3);
    session
        .handle(&Message {
            id: unsubscribe_id,
            unsubscribe: Some(Unsubscribe {
                subscription_id: subscribe_id,
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(unsubscribe_id).error, None);

    let second = Gadget {
        id: gateway.store().new_id(),
        label: "x".to_string(),
        rank: 2,
        ..Gadget::default()
    };
    let mutate_id = message_id(4);
    session
        .handle(&Message {
            id: mutate_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                insert: Some(serde_json::to_vec(&second).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(mutate_id).error, None);
    conn.assert_no_data_for(subscribe_id);
}

#[test]
fn wire_update_and_remove_round_trip() {
    let (gateway, _dir) = open_gateway();
    let (session, conn) = connect(&gateway);
    let store = gateway.store();

    let mut gadget = Gadget {
        id: store.new_id(),
        label: "first".to_string(),
        rank: 1,
        ..Gadget::default()
    };

    let insert_id = message_id(10);
    session
        .handle(&Message {
            id: insert_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                insert: Some(serde_json::to_vec(&gadget).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(insert_id).error, None);

    gadget.label = "second".to_string();
    let update_id = message_id(11);
    session
        .handle(&Message {
            id: update_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                update: Some(serde_json::to_vec(&gadget).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(update_id).error, None);
    let loaded = store
        .view(Caller::system(), |view| view.get::<Gadget>(gadget.id))
        .unwrap();
    assert_eq!(loaded.label, "second");

    let remove_id = message_id(12);
    session
        .handle(&Message {
            id: remove_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                remove: Some(serde_json::to_vec(&gadget).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(remove_id).error, None);
    assert!(store
        .view(Caller::system(), |view| view.get::<Gadget>(gadget.id))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn envelope_validation_and_unknown_types_error() {
    let (gateway, _dir) = open_gateway();
    let (session, conn) = connect(&gateway);

    // No payload at all.
    let empty_id = message_id(20);
    session
        .handle(&Message {
            id: empty_id,
            ..Message::default()
        })
        .unwrap();
    assert!(conn.outcome_for(empty_id).error.is_some());

    // Two payloads at once.
    let double_id = message_id(21);
    session
        .handle(&Message {
            id: double_id,
            identity: Some(Identity::default()),
            unsubscribe: Some(Unsubscribe {
                subscription_id: message_id(1),
            }),
            ..Message::default()
        })
        .unwrap();
    assert!(conn.outcome_for(double_id).error.is_some());

    // Unknown type name.
    let unknown_id = message_id(22);
    session
        .handle(&Message {
            id: unknown_id,
            subscribe: Some(SubscribeRequest {
                type_name: "Nope".to_string(),
                ..SubscribeRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    let outcome = conn.outcome_for(unknown_id);
    assert!(outcome.error.unwrap().contains("not registered"));

    // Unsubscribing something never subscribed.
    let missing_id = message_id(23);
    session
        .handle(&Message {
            id: missing_id,
            unsubscribe: Some(Unsubscribe {
                subscription_id: message_id(9),
            }),
            ..Message::default()
        })
        .unwrap();
    assert!(conn.outcome_for(missing_id).error.is_some());

    // A mutate with no payload variant.
    let hollow_id = message_id(24);
    session
        .handle(&Message {
            id: hollow_id,
            mutate: Some(MutateRequest {
                type_name: "Gadget".to_string(),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert!(conn.outcome_for(hollow_id).error.is_some());
}

#[test]
fn control_denials_travel_inside_outcomes() {
    let (store, _dir) = open_store();
    let gateway = Gateway::new(store, Arc::new(AnonymousIdentifier));
    gateway
        .register::<common::Document, _, _>(
            uncontrolled_queries,
            |update: &rippledb::Update,
             prev: Option<&common::Document>,
             next: Option<&mut common::Document>| {
                if let (None, Some(next)) = (prev, next) {
                    if update.caller().user_id() != Some(next.owner_id) {
                        return Err(StoreError::denied("not the owner"));
                    }
                }
                Ok(())
            },
        )
        .unwrap();
    let (session, conn) = connect(&gateway);

    // The session is anonymous, so the insert is denied; the failure
    // rides in the acknowledgement instead of tearing the session down.
    let document = common::Document {
        id: gateway.store().new_id(),
        owner_id: gateway.store().new_id(),
        label: "private".to_string(),
    };
    let mutate_id = message_id(50);
    session
        .handle(&Message {
            id: mutate_id,
            mutate: Some(MutateRequest {
                type_name: "Document".to_string(),
                insert: Some(serde_json::to_vec(&document).unwrap()),
                ..MutateRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    let outcome = conn.outcome_for(mutate_id);
    assert!(outcome.error.unwrap().contains("not the owner"));
}

/// Identifier resolving a 32-byte token into that user's caller.
struct TokenIdentifier;

impl Identifier for TokenIdentifier {
    fn identify(&self, identity: &Identity) -> StoreResult<(Caller, Option<Vec<u8>>)> {
        if identity.token.is_empty() {
            return Ok((Caller::anonymous(), None));
        }
        let bytes: [u8; 32] = identity
            .token
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::denied("malformed token"))?;
        Ok((Caller::user(Id::from_bytes(bytes)), Some(b"welcome".to_vec())))
    }
}

#[test]
fn identity_switches_the_session_caller() {
    let (store, _dir) = open_store();
    let gateway = Gateway::new(store, Arc::new(TokenIdentifier));
    gateway
        .register::<Gadget, _, _>(uncontrolled_queries, uncontrolled_updates)
        .unwrap();
    let (session, conn) = connect(&gateway);
    assert_eq!(session.caller(), Caller::anonymous());

    let identity_id = message_id(30);
    session
        .handle(&Message {
            id: identity_id,
            identity: Some(Identity {
                token: vec![7; 32],
            }),
            ..Message::default()
        })
        .unwrap();
    let outcome = conn.outcome_for(identity_id);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.aux.as_deref(), Some(&b"welcome"[..]));
    assert_eq!(
        session.caller().user_id(),
        Some(Id::from_bytes([7; 32]))
    );

    // A bad token keeps the previous caller.
    let bad_id = message_id(31);
    session
        .handle(&Message {
            id: bad_id,
            identity: Some(Identity { token: vec![1, 2] }),
            ..Message::default()
        })
        .unwrap();
    assert!(conn.outcome_for(bad_id).error.is_some());
    assert_eq!(
        session.caller().user_id(),
        Some(Id::from_bytes([7; 32]))
    );
}

#[test]
fn dropping_the_session_closes_its_subscriptions() {
    let (gateway, _dir) = open_gateway();
    let (session, conn) = connect(&gateway);

    let subscribe_id = message_id(40);
    session
        .handle(&Message {
            id: subscribe_id,
            subscribe: Some(SubscribeRequest {
                type_name: "Gadget".to_string(),
                ..SubscribeRequest::default()
            }),
            ..Message::default()
        })
        .unwrap();
    assert_eq!(conn.outcome_for(subscribe_id).error, None);
    let _ = conn.data_for(subscribe_id);
    assert_eq!(gateway.store().subscription_count("Gadget"), 1);

    drop(session);
    assert_eq!(gateway.store().subscription_count("Gadget"), 0);
}
