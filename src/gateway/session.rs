//! Per-connection sessions.
//!
//! A [`Session`] owns one connection's view of the store: its current
//! caller (anonymous until an identity message succeeds), its open
//! subscriptions keyed by the subscribe message's id, and the dispatch of
//! every inbound envelope. Outbound traffic — acknowledgements and
//! subscription pushes — flows through the transport's [`MessageSender`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tracing::warn;

use super::message::{
    Data, Identity, Message, MutateOp, MutateRequest, Outcome, SubscribeRequest, Unsubscribe,
};
use crate::access::Caller;
use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::Query;
use crate::record::Record;
use crate::store::Store;
use crate::subscription::SubscriptionHandle;
use crate::sync::{Guarded, ScopedLock, SyncMap};
use crate::transaction::{Update, View};

/// Verifies identity messages into callers. The optional byte payload is
/// returned to the client alongside the acknowledgement.
pub trait Identifier: Send + Sync + 'static {
    /// Resolves a credential into a caller.
    fn identify(&self, identity: &Identity) -> StoreResult<(Caller, Option<Vec<u8>>)>;
}

/// An identifier that admits everyone as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentifier;

impl Identifier for AnonymousIdentifier {
    fn identify(&self, _identity: &Identity) -> StoreResult<(Caller, Option<Vec<u8>>)> {
        Ok((Caller::anonymous(), None))
    }
}

/// Outbound hook implemented by the transport.
pub trait MessageSender: Send + Sync + 'static {
    /// Delivers one message to the connection. An error tears down the
    /// subscription that produced the message.
    fn send(&self, message: Message) -> StoreResult<()>;
}

impl<F> MessageSender for F
where
    F: Fn(Message) -> StoreResult<()> + Send + Sync + 'static,
{
    fn send(&self, message: Message) -> StoreResult<()> {
        self(message)
    }
}

type PayloadSink = Arc<dyn Fn(StoreResult<Vec<u8>>) -> StoreResult<()> + Send + Sync>;

/// Per-type handlers with the record type erased.
struct GatewayType {
    subscribe:
        Box<dyn Fn(&Store, Caller, &Query, PayloadSink) -> StoreResult<SubscriptionHandle> + Send + Sync>,
    mutate: Box<dyn Fn(&Store, Caller, MutateOp, &[u8]) -> StoreResult<()> + Send + Sync>,
}

struct GatewayInner {
    store: Store,
    identifier: Arc<dyn Identifier>,
    types: SyncMap<String, Arc<GatewayType>>,
}

/// The gateway: a store plus the wire-facing type registry and identity
/// hook shared by all sessions.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Wraps a store for gateway use.
    #[must_use]
    pub fn new(store: Store, identifier: Arc<dyn Identifier>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                store,
                identifier,
                types: SyncMap::new(),
            }),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Registers a record type in the store and exposes it on the wire
    /// under its type name.
    pub fn register<T, Q, U>(&self, query_control: Q, update_control: U) -> StoreResult<()>
    where
        T: Record + DeserializeOwned,
        Q: Fn(&View, &mut Query) -> StoreResult<()> + Send + Sync + 'static,
        U: Fn(&Update, Option<&T>, Option<&mut T>) -> StoreResult<()> + Send + Sync + 'static,
    {
        self.inner.store.register::<T, Q, U>(query_control, update_control)?;
        let entry = GatewayType {
            subscribe: Box::new(|store, caller, query, sink| {
                store.subscribe::<T, _>(caller, query, move |outcome: StoreResult<Vec<T>>| {
                    let payload = outcome
                        .and_then(|records| serde_json::to_vec(&records).map_err(StoreError::from));
                    sink(payload)
                })
            }),
            mutate: Box::new(|store, caller, op, bytes| {
                let mut record: T = serde_json::from_slice(bytes)?;
                store.update(caller, |update| match op {
                    MutateOp::Insert => update.insert(&mut record),
                    MutateOp::Update => update.update(&mut record),
                    MutateOp::Remove => update.remove(&record),
                })
            }),
        };
        self.inner
            .types
            .insert(T::type_name().to_string(), Arc::new(entry));
        Ok(())
    }

    fn type_entry(&self, type_name: &str) -> StoreResult<Arc<GatewayType>> {
        self.inner
            .types
            .get(&type_name.to_string())
            .ok_or_else(|| StoreError::NotRegistered {
                type_name: type_name.to_string(),
            })
    }
}

/// One connection's execution context.
pub struct Session {
    gateway: Gateway,
    sender: Arc<dyn MessageSender>,
    // Serializes outbound traffic: acknowledgements and subscription
    // pushes share one wire.
    send_lock: Arc<ScopedLock>,
    caller: Guarded<Caller>,
    subscriptions: Mutex<HashMap<String, SubscriptionHandle>>,
}

impl Session {
    /// Opens a session speaking through the given sender. The caller
    /// starts anonymous.
    #[must_use]
    pub fn new(gateway: Gateway, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            gateway,
            sender,
            send_lock: Arc::new(ScopedLock::new()),
            caller: Guarded::new(Caller::anonymous()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// The session's current caller.
    #[must_use]
    pub fn caller(&self) -> Caller {
        self.caller.get()
    }

    /// Executes one inbound message and acknowledges it. The returned
    /// error is transport failure only; request failures travel inside the
    /// acknowledgement.
    pub fn handle(&self, message: &Message) -> StoreResult<()> {
        if let Err(err) = message.validate() {
            return self.send_outcome(message.id, Err(err), None);
        }
        if let Some(identity) = &message.identity {
            return match self.gateway.inner.identifier.identify(identity) {
                Ok((caller, aux)) => {
                    self.caller.set(caller);
                    self.send_outcome(message.id, Ok(()), aux)
                }
                Err(err) => self.send_outcome(message.id, Err(err), None),
            };
        }
        if let Some(subscribe) = &message.subscribe {
            let result = self.execute_subscribe(message.id, subscribe);
            return self.send_outcome(message.id, result, None);
        }
        if let Some(unsubscribe) = &message.unsubscribe {
            let result = self.execute_unsubscribe(unsubscribe);
            return self.send_outcome(message.id, result, None);
        }
        if let Some(mutate) = &message.mutate {
            let result = self.execute_mutate(mutate);
            return self.send_outcome(message.id, result, None);
        }
        // Data and Outcome only travel server to client.
        warn!(message_id = %message.id, "ignoring unexpected inbound message");
        Ok(())
    }

    fn execute_subscribe(&self, message_id: Id, request: &SubscribeRequest) -> StoreResult<()> {
        let entry = self.gateway.type_entry(&request.type_name)?;
        let query = request.to_query()?;
        let caller = self.caller.get();
        let store = self.gateway.store().clone();
        let sender = Arc::clone(&self.sender);
        let send_lock = Arc::clone(&self.send_lock);
        let sink: PayloadSink = Arc::new(move |outcome| {
            let data = match outcome {
                Ok(payload) => Data {
                    cause_message_id: message_id,
                    error: None,
                    payload,
                },
                Err(err) => Data {
                    cause_message_id: message_id,
                    error: Some(err.to_string()),
                    payload: Vec::new(),
                },
            };
            let message = Message {
                id: store.new_id(),
                data: Some(data),
                ..Message::default()
            };
            send_lock.sync(|| sender.send(message))
        });
        let handle = (entry.subscribe)(self.gateway.store(), caller, &query, sink)?;
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Re-subscribing under the same message id replaces the
        // predecessor.
        if let Some(previous) = subscriptions.insert(message_id.to_hex(), handle) {
            let _ = previous.close();
        }
        Ok(())
    }

    fn execute_unsubscribe(&self, request: &Unsubscribe) -> StoreResult<()> {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request.subscription_id.to_hex());
        match removed {
            Some(handle) => handle.close(),
            None => Err(StoreError::NotOpen),
        }
    }

    fn execute_mutate(&self, request: &MutateRequest) -> StoreResult<()> {
        let entry = self.gateway.type_entry(&request.type_name)?;
        let (op, bytes) = request.op()?;
        (entry.mutate)(self.gateway.store(), self.caller.get(), op, bytes)
    }

    fn send_outcome(
        &self,
        cause: Id,
        result: StoreResult<()>,
        aux: Option<Vec<u8>>,
    ) -> StoreResult<()> {
        let message = Message {
            id: self.gateway.store().new_id(),
            outcome: Some(Outcome {
                cause_message_id: cause,
                error: result.err().map(|err| err.to_string()),
                aux,
            }),
            ..Message::default()
        };
        self.send_lock.sync(|| self.sender.send(message))
    }

    /// Closes every subscription the session opened.
    pub fn close(&self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in subscriptions.drain() {
            let _ = handle.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
