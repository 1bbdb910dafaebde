//! Typed identifiers.
//!
//! Every identifier that crosses a component boundary in Whizbang is a
//! distinct newtype over a time-ordered 128-bit UUID (version 7 preferred,
//! see [`TypedId::generate`]), never a bare `Uuid` or `String`. This mirrors
//! the framework's broader "no stringly-typed handles" stance, generalized
//! from string-backed identifiers to UUID-backed ones: the macro below is
//! the "small code-generation mechanism for typed IDs" that replaces what a
//! reflection-capable host language would otherwise synthesize at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a typed identifier wrapping a time-ordered UUID.
///
/// Every generated type provides `generate` (new, monotonic-per-process),
/// `parse` (validating construction from a string), `from_external` (trusts
/// an already-validated UUID from another system), and a chronological
/// `Ord` derived from the UUID's own byte order — version-7 UUIDs are
/// monotonic non-decreasing when generated by the same process, which is
/// exactly the invariant the specification requires of `TypedId`.
macro_rules! define_typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new, time-ordered identifier.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            /// Parses an identifier from its canonical string form.
            pub fn parse(value: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(value).map(Self)
            }

            /// Wraps a UUID that has already been validated by its origin
            /// (e.g. deserialized from a database row or another service).
            pub fn from_external(value: Uuid) -> Self {
                Self(value)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::parse(value)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::from_external(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_typed_id!(
    /// Identifies one [`crate::envelope::MessageEnvelope`] for its entire
    /// lifetime; the dedup key shared by the outbox, inbox and
    /// deduplication table.
    MessageId
);

define_typed_id!(
    /// Ties together every envelope produced while handling one logical
    /// business operation, regardless of how many hops it takes.
    CorrelationId
);

define_typed_id!(
    /// Identifies the specific envelope whose handling caused a new
    /// envelope to be produced.
    CausationId
);

define_typed_id!(
    /// Identifies a stream (usually an aggregate) for partitioning,
    /// ownership and per-stream ordering purposes.
    StreamKey
);

define_typed_id!(
    /// Identifies one row in the event store; also the cursor type used by
    /// perspective checkpoints.
    EventId
);

define_typed_id!(
    /// Identifies one running process of a Whizbang-hosted service.
    InstanceId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_monotonic_non_decreasing() {
        let mut previous = MessageId::generate();
        for _ in 0..64 {
            let next = MessageId::generate();
            assert!(next >= previous, "expected {next} >= {previous}");
            previous = next;
        }
    }

    #[test]
    fn round_trips_through_string() {
        let id = StreamKey::generate();
        let parsed: StreamKey = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
