//! Event participation (course registration) record.

use crate::model::event::EventId;
use crate::model::person::PersonId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One person registered for one event.
///
/// At most one participation exists per `(event, person)` pair; the
/// storage layer enforces the uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub uuid: Uuid,
    pub event_uuid: EventId,
    pub person_uuid: PersonId,
    /// Registration timestamp in epoch milliseconds, assigned by storage.
    pub created_at: i64,
}
