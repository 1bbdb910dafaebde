//! The permanent first-seen record backing idempotent delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Grows without bound; cleanup of old entries, if ever needed, is an
/// operational concern handled outside this type, not a logical one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeduplicationRecord {
    pub message_id: MessageId,
    pub first_seen_at: DateTime<Utc>,
}
