//! Wire message envelopes.
//!
//! Every envelope carries exactly one payload variant. Record payloads
//! travel as opaque serialized bytes; the session's per-type handlers
//! decode them.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::id::Id;
use crate::query::{Order, Query};
use crate::set::{Cond, Set};

/// Serializable form of a [`Set`]. At most one of the fields may be
/// populated; an empty match means everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Intersection of the contained matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Match>,
    /// Union of the contained matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Match>,
    /// Atomic condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond: Option<Cond>,
}

impl Match {
    fn validate(&self) -> StoreResult<()> {
        let populated = usize::from(!self.and.is_empty())
            + usize::from(!self.or.is_empty())
            + usize::from(self.cond.is_some());
        if populated > 1 {
            return Err(StoreError::backend(
                "at most one of and/or/cond may be populated in a match",
            ));
        }
        Ok(())
    }

    /// Converts the wire form into a [`Set`].
    pub fn to_set(&self) -> StoreResult<Set> {
        self.validate()?;
        if !self.and.is_empty() {
            let children: StoreResult<Vec<Set>> =
                self.and.iter().map(Match::to_set).collect();
            return Ok(Set::And(children?));
        }
        if !self.or.is_empty() {
            let children: StoreResult<Vec<Set>> = self.or.iter().map(Match::to_set).collect();
            return Ok(Set::Or(children?));
        }
        match &self.cond {
            Some(cond) => Ok(Set::Cond(cond.clone())),
            None => Ok(Set::All),
        }
    }
}

/// Client request: open a subscription on a type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Registered type name.
    pub type_name: String,
    /// ORDER BY terms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<Order>,
    /// Row limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// SELECT DISTINCT.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
    /// Predicate over the subscribed type.
    #[serde(rename = "match", default)]
    pub criteria: Match,
}

impl SubscribeRequest {
    /// Converts the request into a [`Query`].
    pub fn to_query(&self) -> StoreResult<Query> {
        Ok(Query {
            set: Some(self.criteria.to_set()?),
            limit: self.limit,
            distinct: self.distinct,
            order: self.order.clone(),
            joins: Vec::new(),
        })
    }
}

/// Client request: mutate a record. Exactly one payload must be populated;
/// the bytes hold the serialized record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutateRequest {
    /// Registered type name.
    pub type_name: String,
    /// Record to insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<Vec<u8>>,
    /// Record to update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Vec<u8>>,
    /// Record to remove.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<u8>>,
}

/// The three mutation operations a [`MutateRequest`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutateOp {
    Insert,
    Update,
    Remove,
}

impl MutateRequest {
    pub(crate) fn op(&self) -> StoreResult<(MutateOp, &[u8])> {
        let mut populated: Vec<(MutateOp, &[u8])> = Vec::new();
        if let Some(bytes) = &self.insert {
            populated.push((MutateOp::Insert, bytes));
        }
        if let Some(bytes) = &self.update {
            populated.push((MutateOp::Update, bytes));
        }
        if let Some(bytes) = &self.remove {
            populated.push((MutateOp::Remove, bytes));
        }
        match populated.as_slice() {
            [(op, bytes)] => Ok((*op, bytes)),
            _ => Err(StoreError::backend(
                "exactly one of insert/update/remove must be populated",
            )),
        }
    }
}

/// Client request: attain a caller identity from a credential token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque credential bytes, interpreted by the configured
    /// [`Identifier`](super::Identifier).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token: Vec<u8>,
}

/// Client request: cancel the subscription opened by the message with the
/// given id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unsubscribe {
    /// Id of the subscribe message being cancelled.
    pub subscription_id: Id,
}

/// Server push: a subscription's materialized result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// Id of the subscribe message that caused this push.
    pub cause_message_id: Id,
    /// Load error, when the push carries one instead of a payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Serialized result set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

/// Server response to every client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Id of the message being answered.
    pub cause_message_id: Id,
    /// Failure description, when the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Auxiliary payload (e.g. identity metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<Vec<u8>>,
}

/// The envelope travelling in both directions. Exactly one payload field
/// must be populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: Id,

    /// Client payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Subscription request.
    pub subscribe: Option<SubscribeRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Subscription cancellation.
    pub unsubscribe: Option<Unsubscribe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Mutation request.
    pub mutate: Option<MutateRequest>,

    /// Server payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Request acknowledgement.
    pub outcome: Option<Outcome>,
}

impl Message {
    /// Checks that exactly one payload field is populated.
    pub fn validate(&self) -> StoreResult<()> {
        let populated = usize::from(self.identity.is_some())
            + usize::from(self.subscribe.is_some())
            + usize::from(self.unsubscribe.is_some())
            + usize::from(self.mutate.is_some())
            + usize::from(self.data.is_some())
            + usize::from(self.outcome.is_some());
        if populated == 1 {
            Ok(())
        } else {
            Err(StoreError::backend(format!(
                "exactly one payload field must be populated, found {populated}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::Comparator;
    use crate::value::Value;

    fn message_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    #[test]
    fn test_match_empty_means_all() {
        assert_eq!(Match::default().to_set().unwrap(), Set::All);
    }

    #[test]
    fn test_match_nested_conversion() {
        let wire = Match {
            and: vec![
                Match {
                    cond: Some(Cond::new("Rank", Comparator::Gt, 2)),
                    ..Match::default()
                },
                Match {
                    or: vec![
                        Match {
                            cond: Some(Cond::new("Label", Comparator::Eq, "a")),
                            ..Match::default()
                        },
                        Match::default(),
                    ],
                    ..Match::default()
                },
            ],
            ..Match::default()
        };
        let set = wire.to_set().unwrap();
        assert_eq!(
            set,
            Set::And(vec![
                Set::cond("Rank", Comparator::Gt, 2),
                Set::Or(vec![Set::cond("Label", Comparator::Eq, "a"), Set::All]),
            ])
        );
    }

    #[test]
    fn test_match_rejects_two_variants() {
        let wire = Match {
            and: vec![Match::default()],
            cond: Some(Cond::new("X", Comparator::Eq, 1)),
            ..Match::default()
        };
        assert!(wire.to_set().is_err());
    }

    #[test]
    fn test_subscribe_to_query() {
        let request = SubscribeRequest {
            type_name: "Point".to_string(),
            order: vec![Order::desc("Rank")],
            limit: Some(5),
            distinct: true,
            criteria: Match {
                cond: Some(Cond::new("Rank", Comparator::Ge, 1)),
                ..Match::default()
            },
        };
        let query = request.to_query().unwrap();
        assert_eq!(query.set, Some(Set::cond("Rank", Comparator::Ge, 1)));
        assert_eq!(query.limit, Some(5));
        assert!(query.distinct);
        assert_eq!(query.order.len(), 1);
        assert!(query.joins.is_empty());
    }

    #[test]
    fn test_mutate_requires_exactly_one_payload() {
        let empty = MutateRequest {
            type_name: "Point".to_string(),
            ..MutateRequest::default()
        };
        assert!(empty.op().is_err());

        let double = MutateRequest {
            type_name: "Point".to_string(),
            insert: Some(vec![1]),
            update: Some(vec![2]),
            ..MutateRequest::default()
        };
        assert!(double.op().is_err());

        let single = MutateRequest {
            type_name: "Point".to_string(),
            remove: Some(vec![3]),
            ..MutateRequest::default()
        };
        let (op, bytes) = single.op().unwrap();
        assert_eq!(op, MutateOp::Remove);
        assert_eq!(bytes, &[3]);
    }

    #[test]
    fn test_message_validation() {
        let mut message = Message {
            id: message_id(1),
            ..Message::default()
        };
        assert!(message.validate().is_err());

        message.identity = Some(Identity::default());
        assert!(message.validate().is_ok());

        message.mutate = Some(MutateRequest::default());
        assert!(message.validate().is_err());
    }

    #[test]
    fn test_message_serde_round_trip() {
        let message = Message {
            id: message_id(7),
            subscribe: Some(SubscribeRequest {
                type_name: "Point".to_string(),
                criteria: Match {
                    cond: Some(Cond::new("Label", Comparator::Eq, Value::from("x"))),
                    ..Match::default()
                },
                ..SubscribeRequest::default()
            }),
            ..Message::default()
        };
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
        // The match field keeps its wire name.
        assert!(json.contains("\"match\""));
    }
}
