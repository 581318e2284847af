//! Event repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over events and their date/question collections.
//! - Apply a parent update plus all child-collection writes in one
//!   transaction.
//!
//! # Invariants
//! - Write paths validate event and child records before SQL mutations.
//! - `apply_update` bumps `lock_version` by exactly one per commit and
//!   rejects mismatched expected versions without writing anything.
//! - Child collections are read back with an explicit sort key
//!   (`start_on` for dates, question text for questions).

use crate::model::event::{Event, EventDate, EventId, EventKind, EventQuestion};
use crate::model::group::GroupId;
use crate::reconcile::{Reconcilable, ReconcileOutcome};
use crate::repo::{bool_to_int, ensure_connection_ready, int_to_bool, parse_uuid, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

const EVENT_SELECT_SQL: &str = "SELECT
    uuid,
    group_uuid,
    name,
    kind,
    contact_uuid,
    application_open,
    required_contact_attrs,
    hidden_contact_attrs,
    lock_version
FROM events";

const EVENT_COLUMNS: &[&str] = &[
    "uuid",
    "group_uuid",
    "name",
    "kind",
    "contact_uuid",
    "application_open",
    "required_contact_attrs",
    "hidden_contact_attrs",
    "lock_version",
    "updated_at",
];
const EVENT_DATE_COLUMNS: &[&str] = &["uuid", "event_uuid", "label", "start_on", "finish_on"];
const EVENT_QUESTION_COLUMNS: &[&str] = &["uuid", "event_uuid", "question", "choices", "admin"];

/// Pending writes for one child collection, derived from a reconcile
/// outcome or left empty when the collection was not submitted.
#[derive(Debug, Clone)]
pub struct ChildWrites<C> {
    pub inserts: Vec<C>,
    pub updates: Vec<C>,
    pub deletes: Vec<Uuid>,
}

impl<C> Default for ChildWrites<C> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<C> ChildWrites<C> {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

impl<C: Clone> From<&ReconcileOutcome<C>> for ChildWrites<C> {
    fn from(outcome: &ReconcileOutcome<C>) -> Self {
        Self {
            inserts: outcome.inserted.clone(),
            updates: outcome.updated.clone(),
            deletes: outcome.deleted.clone(),
        }
    }
}

/// Query options for event listings.
#[derive(Debug, Clone, Default)]
pub struct EventListQuery {
    /// Owning groups to match; empty matches nothing.
    pub group_uuids: Vec<GroupId>,
    /// Restrict to events with a date starting in this year.
    pub year: Option<i32>,
    pub kind: Option<EventKind>,
}

/// Repository interface for event persistence.
pub trait EventRepository {
    /// Persists an event with its initial child collections in one
    /// transaction.
    fn create_event(
        &mut self,
        event: &Event,
        dates: &[EventDate],
        questions: &[EventQuestion],
    ) -> RepoResult<EventId>;
    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>>;
    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>>;
    /// Dates of one event ordered by `start_on`, then label.
    fn list_dates(&self, event: EventId) -> RepoResult<Vec<EventDate>>;
    /// Questions of one event with the given admin flag, ordered by text.
    fn list_questions(&self, event: EventId, admin: bool) -> RepoResult<Vec<EventQuestion>>;
    /// Commits parent fields and all child-collection writes atomically.
    ///
    /// Returns the new `lock_version`.
    fn apply_update(
        &mut self,
        event: &Event,
        expected_version: Option<i64>,
        dates: &ChildWrites<EventDate>,
        questions: &ChildWrites<EventQuestion>,
    ) -> RepoResult<i64>;
    fn delete_event(&self, id: EventId) -> RepoResult<()>;
}

/// SQLite-backed event repository.
pub struct SqliteEventRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &[
                ("events", EVENT_COLUMNS),
                ("event_dates", EVENT_DATE_COLUMNS),
                ("event_questions", EVENT_QUESTION_COLUMNS),
            ],
        )?;
        Ok(Self { conn })
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn create_event(
        &mut self,
        event: &Event,
        dates: &[EventDate],
        questions: &[EventQuestion],
    ) -> RepoResult<EventId> {
        validate_event(event)?;
        for date in dates {
            validate_child(&date.validate())?;
        }
        for question in questions {
            validate_child(&question.validate())?;
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO events (
                uuid,
                group_uuid,
                name,
                kind,
                contact_uuid,
                application_open,
                required_contact_attrs,
                hidden_contact_attrs,
                lock_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                event.uuid.to_string(),
                event.group_uuid.to_string(),
                event.name.as_str(),
                event.kind.as_str(),
                event.contact_uuid.map(|id| id.to_string()),
                bool_to_int(event.application_open),
                attrs_to_db(&event.required_contact_attrs)?,
                attrs_to_db(&event.hidden_contact_attrs)?,
                event.lock_version,
            ],
        )?;

        for date in dates {
            insert_date(&tx, date)?;
        }
        for question in questions {
            insert_question(&tx, question)?;
        }

        tx.commit()?;
        Ok(event.uuid)
    }

    fn get_event(&self, id: EventId) -> RepoResult<Option<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} WHERE uuid = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_event_row(row)?));
        }

        Ok(None)
    }

    fn list_events(&self, query: &EventListQuery) -> RepoResult<Vec<Event>> {
        if query.group_uuids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; query.group_uuids.len()].join(", ");
        let mut sql = format!("{EVENT_SELECT_SQL} WHERE group_uuid IN ({placeholders})");
        let mut bind_values: Vec<Value> = query
            .group_uuids
            .iter()
            .map(|id| Value::Text(id.to_string()))
            .collect();

        if let Some(kind) = query.kind {
            sql.push_str(" AND kind = ?");
            bind_values.push(Value::Text(kind.as_str().to_string()));
        }

        if let Some(year) = query.year {
            sql.push_str(
                " AND EXISTS (
                    SELECT 1 FROM event_dates
                     WHERE event_dates.event_uuid = events.uuid
                       AND strftime('%Y', event_dates.start_on) = ?
                )",
            );
            bind_values.push(Value::Text(format!("{year:04}")));
        }

        sql.push_str(" ORDER BY name COLLATE NOCASE ASC, uuid ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }

        Ok(events)
    }

    fn list_dates(&self, event: EventId) -> RepoResult<Vec<EventDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, event_uuid, label, start_on, finish_on
             FROM event_dates
             WHERE event_uuid = ?1
             ORDER BY start_on ASC, label COLLATE NOCASE ASC, uuid ASC;",
        )?;

        let mut rows = stmt.query([event.to_string()])?;
        let mut dates = Vec::new();
        while let Some(row) = rows.next()? {
            dates.push(parse_date_row(row)?);
        }

        Ok(dates)
    }

    fn list_questions(&self, event: EventId, admin: bool) -> RepoResult<Vec<EventQuestion>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, event_uuid, question, choices, admin
             FROM event_questions
             WHERE event_uuid = ?1 AND admin = ?2
             ORDER BY question COLLATE NOCASE ASC, uuid ASC;",
        )?;

        let mut rows = stmt.query(params![event.to_string(), bool_to_int(admin)])?;
        let mut questions = Vec::new();
        while let Some(row) = rows.next()? {
            questions.push(parse_question_row(row)?);
        }

        Ok(questions)
    }

    fn apply_update(
        &mut self,
        event: &Event,
        expected_version: Option<i64>,
        dates: &ChildWrites<EventDate>,
        questions: &ChildWrites<EventQuestion>,
    ) -> RepoResult<i64> {
        validate_event(event)?;
        for date in dates.updates.iter().chain(dates.inserts.iter()) {
            validate_child(&date.validate())?;
        }
        for question in questions.updates.iter().chain(questions.inserts.iter()) {
            validate_child(&question.validate())?;
        }

        let event_uuid = event.uuid.to_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual_version: i64 = tx
            .query_row(
                "SELECT lock_version FROM events WHERE uuid = ?1;",
                [event_uuid.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => RepoError::NotFound(event.uuid),
                other => other.into(),
            })?;

        if let Some(expected) = expected_version {
            if actual_version != expected {
                return Err(RepoError::StaleVersion {
                    expected,
                    actual: actual_version,
                });
            }
        }

        tx.execute(
            "UPDATE events
             SET
                name = ?1,
                kind = ?2,
                contact_uuid = ?3,
                application_open = ?4,
                required_contact_attrs = ?5,
                hidden_contact_attrs = ?6,
                lock_version = lock_version + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?7;",
            params![
                event.name.as_str(),
                event.kind.as_str(),
                event.contact_uuid.map(|id| id.to_string()),
                bool_to_int(event.application_open),
                attrs_to_db(&event.required_contact_attrs)?,
                attrs_to_db(&event.hidden_contact_attrs)?,
                event_uuid.as_str(),
            ],
        )?;

        for id in &dates.deletes {
            delete_child(&tx, "event_dates", *id, &event_uuid)?;
        }
        for date in &dates.updates {
            let changed = tx.execute(
                "UPDATE event_dates
                 SET label = ?1, start_on = ?2, finish_on = ?3
                 WHERE uuid = ?4 AND event_uuid = ?5;",
                params![
                    date.label.as_str(),
                    date_to_db(date.start_on),
                    date.finish_on.map(date_to_db),
                    date.uuid.to_string(),
                    event_uuid.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::NotFound(date.uuid));
            }
        }
        for date in &dates.inserts {
            insert_date(&tx, date)?;
        }

        for id in &questions.deletes {
            delete_child(&tx, "event_questions", *id, &event_uuid)?;
        }
        for question in &questions.updates {
            let changed = tx.execute(
                "UPDATE event_questions
                 SET question = ?1, choices = ?2
                 WHERE uuid = ?3 AND event_uuid = ?4;",
                params![
                    question.question.as_str(),
                    question.choices.as_deref(),
                    question.uuid.to_string(),
                    event_uuid.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::NotFound(question.uuid));
            }
        }
        for question in &questions.inserts {
            insert_question(&tx, question)?;
        }

        tx.commit()?;
        Ok(actual_version + 1)
    }

    fn delete_event(&self, id: EventId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM events WHERE uuid = ?1;", [id.to_string()])?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }
}

fn validate_event(event: &Event) -> RepoResult<()> {
    let violations = event.validate();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(RepoError::EventValidation(violations))
    }
}

fn validate_child(violations: &[crate::model::FieldViolation]) -> RepoResult<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(RepoError::EventValidation(violations.to_vec()))
    }
}

fn delete_child(tx: &Transaction<'_>, table: &str, id: Uuid, event_uuid: &str) -> RepoResult<()> {
    let changed = tx.execute(
        &format!("DELETE FROM {table} WHERE uuid = ?1 AND event_uuid = ?2;"),
        params![id.to_string(), event_uuid],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound(id));
    }
    Ok(())
}

fn insert_date(tx: &Transaction<'_>, date: &EventDate) -> RepoResult<()> {
    tx.execute(
        "INSERT INTO event_dates (uuid, event_uuid, label, start_on, finish_on)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            date.uuid.to_string(),
            date.event_uuid.to_string(),
            date.label.as_str(),
            date_to_db(date.start_on),
            date.finish_on.map(date_to_db),
        ],
    )?;
    Ok(())
}

fn insert_question(tx: &Transaction<'_>, question: &EventQuestion) -> RepoResult<()> {
    tx.execute(
        "INSERT INTO event_questions (uuid, event_uuid, question, choices, admin)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            question.uuid.to_string(),
            question.event_uuid.to_string(),
            question.question.as_str(),
            question.choices.as_deref(),
            bool_to_int(question.admin),
        ],
    )?;
    Ok(())
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<Event> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "events.uuid")?;

    let group_text: String = row.get("group_uuid")?;
    let group_uuid = parse_uuid(&group_text, "events.group_uuid")?;

    let kind_text: String = row.get("kind")?;
    let kind = EventKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid event kind `{kind_text}` in events.kind"))
    })?;

    let contact_uuid = match row.get::<_, Option<String>>("contact_uuid")? {
        Some(value) => Some(parse_uuid(&value, "events.contact_uuid")?),
        None => None,
    };

    let application_open = int_to_bool(row.get("application_open")?, "events.application_open")?;

    Ok(Event {
        uuid,
        group_uuid,
        name: row.get("name")?,
        kind,
        contact_uuid,
        application_open,
        required_contact_attrs: attrs_from_db(
            &row.get::<_, String>("required_contact_attrs")?,
            "events.required_contact_attrs",
        )?,
        hidden_contact_attrs: attrs_from_db(
            &row.get::<_, String>("hidden_contact_attrs")?,
            "events.hidden_contact_attrs",
        )?,
        lock_version: row.get("lock_version")?,
    })
}

fn parse_date_row(row: &Row<'_>) -> RepoResult<EventDate> {
    let uuid_text: String = row.get("uuid")?;
    let event_text: String = row.get("event_uuid")?;
    let start_text: String = row.get("start_on")?;

    let finish_on = match row.get::<_, Option<String>>("finish_on")? {
        Some(value) => Some(date_from_db(&value, "event_dates.finish_on")?),
        None => None,
    };

    Ok(EventDate {
        uuid: parse_uuid(&uuid_text, "event_dates.uuid")?,
        event_uuid: parse_uuid(&event_text, "event_dates.event_uuid")?,
        label: row.get("label")?,
        start_on: date_from_db(&start_text, "event_dates.start_on")?,
        finish_on,
    })
}

fn parse_question_row(row: &Row<'_>) -> RepoResult<EventQuestion> {
    let uuid_text: String = row.get("uuid")?;
    let event_text: String = row.get("event_uuid")?;
    let admin = int_to_bool(row.get("admin")?, "event_questions.admin")?;

    Ok(EventQuestion {
        uuid: parse_uuid(&uuid_text, "event_questions.uuid")?,
        event_uuid: parse_uuid(&event_text, "event_questions.event_uuid")?,
        question: row.get("question")?,
        choices: row.get("choices")?,
        admin,
    })
}

fn date_to_db(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_db(value: &str, context: &str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| RepoError::InvalidData(format!("invalid date value `{value}` in {context}")))
}

fn attrs_to_db(attrs: &BTreeSet<String>) -> RepoResult<String> {
    serde_json::to_string(attrs)
        .map_err(|err| RepoError::InvalidData(format!("contact attrs not serializable: {err}")))
}

fn attrs_from_db(value: &str, context: &str) -> RepoResult<BTreeSet<String>> {
    serde_json::from_str(value).map_err(|_| {
        RepoError::InvalidData(format!("invalid contact attr list `{value}` in {context}"))
    })
}
