//! Participation repository contracts and SQLite implementation.
//!
//! # Invariants
//! - At most one participation per `(event, person)`; a second create is
//!   reported as a duplicate, not silently ignored.

use crate::model::event::EventId;
use crate::model::participation::Participation;
use crate::model::person::PersonId;
use crate::repo::{ensure_connection_ready, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const PARTICIPATION_SELECT_SQL: &str = "SELECT
    uuid,
    event_uuid,
    person_uuid,
    created_at
FROM event_participations";

const PARTICIPATION_COLUMNS: &[&str] = &["uuid", "event_uuid", "person_uuid", "created_at"];

/// Repository interface for event registrations.
pub trait ParticipationRepository {
    fn create_participation(&self, event: EventId, person: PersonId)
        -> RepoResult<Participation>;
    fn get_participation(
        &self,
        event: EventId,
        person: PersonId,
    ) -> RepoResult<Option<Participation>>;
    /// Participations of one event ordered by registration time.
    fn list_participations(&self, event: EventId) -> RepoResult<Vec<Participation>>;
    fn delete_participation(&self, event: EventId, person: PersonId) -> RepoResult<()>;
}

/// SQLite-backed participation repository.
pub struct SqliteParticipationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteParticipationRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &[("event_participations", PARTICIPATION_COLUMNS)])?;
        Ok(Self { conn })
    }
}

impl ParticipationRepository for SqliteParticipationRepository<'_> {
    fn create_participation(
        &self,
        event: EventId,
        person: PersonId,
    ) -> RepoResult<Participation> {
        if self.get_participation(event, person)?.is_some() {
            return Err(RepoError::Duplicate("participation"));
        }

        let uuid = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO event_participations (uuid, event_uuid, person_uuid)
             VALUES (?1, ?2, ?3);",
            params![uuid.to_string(), event.to_string(), person.to_string()],
        )?;

        self.get_participation(event, person)?
            .ok_or(RepoError::NotFound(uuid))
    }

    fn get_participation(
        &self,
        event: EventId,
        person: PersonId,
    ) -> RepoResult<Option<Participation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PARTICIPATION_SELECT_SQL}
             WHERE event_uuid = ?1 AND person_uuid = ?2;"
        ))?;

        let mut rows = stmt.query(params![event.to_string(), person.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_participation_row(row)?));
        }

        Ok(None)
    }

    fn list_participations(&self, event: EventId) -> RepoResult<Vec<Participation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PARTICIPATION_SELECT_SQL}
             WHERE event_uuid = ?1
             ORDER BY created_at ASC, uuid ASC;"
        ))?;

        let mut rows = stmt.query([event.to_string()])?;
        let mut participations = Vec::new();
        while let Some(row) = rows.next()? {
            participations.push(parse_participation_row(row)?);
        }

        Ok(participations)
    }

    fn delete_participation(&self, event: EventId, person: PersonId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM event_participations
             WHERE event_uuid = ?1 AND person_uuid = ?2;",
            params![event.to_string(), person.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(person));
        }

        Ok(())
    }
}

fn parse_participation_row(row: &Row<'_>) -> RepoResult<Participation> {
    let uuid_text: String = row.get("uuid")?;
    let event_text: String = row.get("event_uuid")?;
    let person_text: String = row.get("person_uuid")?;

    Ok(Participation {
        uuid: parse_uuid(&uuid_text, "event_participations.uuid")?,
        event_uuid: parse_uuid(&event_text, "event_participations.event_uuid")?,
        person_uuid: parse_uuid(&person_text, "event_participations.person_uuid")?,
        created_at: row.get("created_at")?,
    })
}
