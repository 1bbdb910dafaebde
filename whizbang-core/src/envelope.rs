//! The message envelope and its hop trail — the unit of work that flows
//! through the outbox, inbox, event store and dispatcher.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::{CausationId, CorrelationId, MessageId, StreamKey};

/// Tenant/user/partition scoping data carried alongside a payload. Left as
/// an opaque JSON document: the core never interprets scope, only threads
/// it through so application handlers can.
pub type Scope = serde_json::Value;

/// Identifies the process and call site that appended a [`Hop`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstanceRef {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub pid: u32,
}

/// An optional member/file/line triple identifying the exact call site that
/// produced a hop, useful when diagnosing a message that took an
/// unexpected path through the system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub member: String,
    pub file: String,
    pub line: u32,
}

/// Distinguishes the hop that describes *this* processing step from a hop
/// merely recording the causation chain that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopType {
    Current,
    Causation,
}

/// One record of a processing step an envelope passed through. Exactly one
/// hop is appended per service/stage visit; hops are never mutated or
/// removed once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub hop_type: HopType,
    pub service_instance: ServiceInstanceRef,
    pub timestamp: SystemTime,
    pub topic: Option<String>,
    pub stream_key: Option<StreamKey>,
    pub partition: Option<u32>,
    pub sequence: Option<u64>,
    pub execution_strategy: Option<String>,
    pub correlation_id: CorrelationId,
    pub causation_id: CausationId,
    pub scope: Option<Scope>,
    pub call_site: Option<CallSite>,
    pub duration: Option<std::time::Duration>,
}

impl Hop {
    /// Builds the first hop for a freshly produced envelope: its causation
    /// id equals its own correlation id (there is no parent to inherit
    /// from yet).
    pub fn origin(service_instance: ServiceInstanceRef, correlation_id: CorrelationId) -> Self {
        let causation_id = CausationId::from_external(correlation_id.as_uuid());
        Self {
            hop_type: HopType::Current,
            service_instance,
            timestamp: SystemTime::now(),
            topic: None,
            stream_key: None,
            partition: None,
            sequence: None,
            execution_strategy: None,
            correlation_id,
            causation_id,
            scope: None,
            call_site: None,
            duration: None,
        }
    }
}

/// The unit of work carried through Whizbang: a typed payload plus
/// identity, scope and an append-only hop trail.
///
/// Invariant: `hops` is non-empty from the moment an envelope enters the
/// system. [`MessageEnvelope::new`] enforces this at construction; there is
/// no public way to clear the hop list afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    message_id: MessageId,
    payload: T,
    hops: Vec<Hop>,
    scope: Option<Scope>,
}

impl<T> MessageEnvelope<T> {
    /// Creates a new envelope with its origin hop already appended.
    pub fn new(payload: T, origin: Hop) -> Self {
        Self {
            message_id: MessageId::generate(),
            payload,
            hops: vec![origin],
            scope: None,
        }
    }

    /// Wraps an existing payload and hop trail read back from storage.
    /// Panics if `hops` is empty: a row read from the outbox/inbox/event
    /// store must already satisfy the envelope invariant.
    pub fn from_parts(message_id: MessageId, payload: T, hops: Vec<Hop>, scope: Option<Scope>) -> Self {
        assert!(
            !hops.is_empty(),
            "MessageEnvelope invariant violated: hops must be non-empty"
        );
        Self {
            message_id,
            payload,
            hops,
            scope,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Appends a new hop. This is the only way `hops` ever grows.
    pub fn append_hop(&mut self, hop: Hop) {
        self.hops.push(hop);
    }

    /// The most recently appended hop, i.e. the current processing step.
    pub fn current_hop(&self) -> &Hop {
        self.hops.last().expect("hops is never empty")
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.current_hop().correlation_id
    }

    pub fn causation_id(&self) -> CausationId {
        self.current_hop().causation_id
    }

    /// Builds the origin hop for a new envelope spawned while handling this
    /// one: the child inherits the parent's correlation id and sets its
    /// causation id to the parent's message id.
    pub fn child_hop(&self, service_instance: ServiceInstanceRef) -> Hop {
        let correlation_id = self.correlation_id();
        let mut hop = Hop::origin(service_instance, correlation_id);
        hop.causation_id = CausationId::from_external(self.message_id.as_uuid());
        hop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ServiceInstanceRef {
        ServiceInstanceRef {
            service_name: "test-service".into(),
            instance_id: "i-1".into(),
            host: "localhost".into(),
            pid: 1,
        }
    }

    #[test]
    fn new_envelope_always_has_a_hop() {
        let correlation_id = CorrelationId::generate();
        let envelope = MessageEnvelope::new("payload", Hop::origin(instance(), correlation_id));
        assert_eq!(envelope.hops().len(), 1);
    }

    #[test]
    fn child_hop_inherits_correlation_and_sets_causation() {
        let correlation_id = CorrelationId::generate();
        let parent = MessageEnvelope::new("parent", Hop::origin(instance(), correlation_id));

        let child_hop = parent.child_hop(instance());
        assert_eq!(child_hop.correlation_id, correlation_id);
        assert_eq!(
            child_hop.causation_id.as_uuid(),
            parent.message_id().as_uuid()
        );
    }

    #[test]
    #[should_panic(expected = "hops must be non-empty")]
    fn from_parts_rejects_empty_hops() {
        let _ = MessageEnvelope::from_parts(MessageId::generate(), "x", Vec::new(), None);
    }
}
