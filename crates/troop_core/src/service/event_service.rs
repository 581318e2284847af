//! Event use-case service.
//!
//! # Responsibility
//! - Orchestrate event create/update flows, including the per-collection
//!   reconciliation of dates, application questions and admin questions.
//! - Gate mutations on the viewer's access to the owning group.
//! - Provide event listing, duplication and registration operations.
//!
//! # Invariants
//! - A submitted child collection is reconciled in full or not at all;
//!   collections absent from a request stay untouched.
//! - Parent fields, `lock_version` bump and all child writes commit in
//!   one repository transaction.
//! - The service never retries stale-version conflicts; callers resubmit
//!   against re-read state.

use crate::access::{can_manage_event, AccessError, Viewer};
use crate::model::event::{
    Event, EventDate, EventDateFields, EventId, EventKind, EventQuestion, EventQuestionFields,
};
use crate::model::group::GroupId;
use crate::model::participation::Participation;
use crate::model::person::PersonId;
use crate::model::FieldViolation;
use crate::reconcile::{reconcile, ChangeSet, Reconcilable, ReconcileError, SubmittedRecord};
use crate::repo::event_repo::{
    ChildWrites, EventListQuery, EventRepository, SqliteEventRepository,
};
use crate::repo::group_repo::{GroupRepository, SqliteGroupRepository};
use crate::repo::participation_repo::{
    ParticipationRepository, SqliteParticipationRepository,
};
use crate::repo::person_repo::{PersonRepository, SqlitePersonRepository};
use crate::repo::RepoError;
use log::debug;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Contact attribute sets replaced as a whole on update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactAttrSets {
    pub required: BTreeSet<String>,
    pub hidden: BTreeSet<String>,
}

/// Request model for creating an event with initial child collections.
#[derive(Debug, Clone)]
pub struct EventCreateRequest {
    pub group_uuid: GroupId,
    pub name: String,
    pub kind: EventKind,
    pub contact_uuid: Option<PersonId>,
    pub dates: Vec<EventDateFields>,
    pub application_questions: Vec<EventQuestionFields>,
    pub admin_questions: Vec<EventQuestionFields>,
}

/// Request model for updating an event.
///
/// `None` collection fields leave the stored collection untouched; a
/// present mapping is reconciled against current children.
#[derive(Debug, Clone, Default)]
pub struct EventUpdateRequest {
    pub event_uuid: EventId,
    /// Expected `lock_version`; `None` skips the concurrency check.
    pub expected_version: Option<i64>,
    pub name: Option<String>,
    pub application_open: Option<bool>,
    pub contact_attrs: Option<ContactAttrSets>,
    pub dates: Option<BTreeMap<String, SubmittedRecord<EventDateFields>>>,
    pub application_questions: Option<BTreeMap<String, SubmittedRecord<EventQuestionFields>>>,
    pub admin_questions: Option<BTreeMap<String, SubmittedRecord<EventQuestionFields>>>,
}

/// Event with its child collections in display order.
#[derive(Debug, Clone)]
pub struct EventAggregate {
    pub event: Event,
    /// Ordered by `start_on`, then label.
    pub dates: Vec<EventDate>,
    /// Ordered by question text.
    pub application_questions: Vec<EventQuestion>,
    /// Ordered by question text.
    pub admin_questions: Vec<EventQuestion>,
}

/// Group scope for event listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventListFilter {
    /// Events of the group and all its descendants.
    Subtree,
    /// Events of the group alone.
    GroupOnly,
}

/// Errors from event service operations.
#[derive(Debug)]
pub enum EventServiceError {
    EventNotFound(EventId),
    GroupNotFound(GroupId),
    PersonNotFound(PersonId),
    /// Viewer may not manage events of the owning group.
    NotPermitted {
        person_uuid: PersonId,
        group_uuid: GroupId,
    },
    /// Child-collection reconciliation failed; nothing was written.
    Reconcile(ReconcileError),
    /// Parent-level field constraints failed.
    Validation(Vec<FieldViolation>),
    /// Stored version moved past the expected one; resubmit after reload.
    Conflict {
        expected: i64,
        actual: i64,
    },
    AlreadyRegistered {
        event_uuid: EventId,
        person_uuid: PersonId,
    },
    Access(AccessError),
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for EventServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventNotFound(id) => write!(f, "event not found: {id}"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::PersonNotFound(id) => write!(f, "person not found: {id}"),
            Self::NotPermitted {
                person_uuid,
                group_uuid,
            } => write!(
                f,
                "person {person_uuid} may not manage events of group {group_uuid}"
            ),
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::Validation(violations) => {
                write!(f, "event is invalid:")?;
                for violation in violations {
                    write!(f, " {violation};")?;
                }
                Ok(())
            }
            Self::Conflict { expected, actual } => write!(
                f,
                "event was modified concurrently: expected version {expected}, found {actual}"
            ),
            Self::AlreadyRegistered {
                event_uuid,
                person_uuid,
            } => write!(
                f,
                "person {person_uuid} is already registered for event {event_uuid}"
            ),
            Self::Access(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent event state: {details}")
            }
        }
    }
}

impl Error for EventServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Reconcile(err) => Some(err),
            Self::Access(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ReconcileError> for EventServiceError {
    fn from(value: ReconcileError) -> Self {
        Self::Reconcile(value)
    }
}

impl From<AccessError> for EventServiceError {
    fn from(value: AccessError) -> Self {
        Self::Access(value)
    }
}

impl From<RepoError> for EventServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::StaleVersion { expected, actual } => Self::Conflict { expected, actual },
            RepoError::EventValidation(violations) => Self::Validation(violations),
            other => Self::Repo(other),
        }
    }
}

/// Event service facade over one migrated connection.
///
/// Unlike the person/group facades this service spans multiple
/// repositories and the access layer, so it borrows the connection
/// directly and builds repositories per call.
pub struct EventService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> EventService<'conn> {
    /// Creates a service over a migrated connection.
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Loads one event with its child collections in display order.
    pub fn get_event(
        &mut self,
        event_uuid: EventId,
    ) -> Result<Option<EventAggregate>, EventServiceError> {
        let repo = SqliteEventRepository::try_new(self.conn)?;
        let Some(event) = repo.get_event(event_uuid)? else {
            return Ok(None);
        };

        let dates = repo.list_dates(event_uuid)?;
        let application_questions = repo.list_questions(event_uuid, false)?;
        let admin_questions = repo.list_questions(event_uuid, true)?;

        Ok(Some(EventAggregate {
            event,
            dates,
            application_questions,
            admin_questions,
        }))
    }

    /// Creates an event with its initial child collections.
    pub fn create_event(
        &mut self,
        viewer: &Viewer,
        request: &EventCreateRequest,
    ) -> Result<EventAggregate, EventServiceError> {
        {
            let group_repo = SqliteGroupRepository::try_new(self.conn)?;
            group_repo
                .get_group(request.group_uuid, false)?
                .ok_or(EventServiceError::GroupNotFound(request.group_uuid))?;
        }

        if !can_manage_event(self.conn, viewer, request.group_uuid)? {
            return Err(EventServiceError::NotPermitted {
                person_uuid: viewer.person_uuid,
                group_uuid: request.group_uuid,
            });
        }

        let mut event = Event::new(request.group_uuid, request.name.clone(), request.kind);
        event.contact_uuid = request.contact_uuid;

        let dates: Vec<EventDate> = request
            .dates
            .iter()
            .map(|fields| EventDate::new_scoped(event.uuid, fields))
            .collect();

        let mut questions: Vec<EventQuestion> = request
            .application_questions
            .iter()
            .map(|fields| EventQuestion::new_scoped(event.uuid, fields))
            .collect();
        questions.extend(request.admin_questions.iter().map(|fields| {
            let mut question = EventQuestion::new_scoped(event.uuid, fields);
            question.admin = true;
            question
        }));

        {
            let mut repo = SqliteEventRepository::try_new(self.conn)?;
            repo.create_event(&event, &dates, &questions)?;
        }

        debug!(
            "event=event_create module=service status=ok event_uuid={} group_uuid={} dates={} questions={}",
            event.uuid,
            event.group_uuid,
            dates.len(),
            questions.len()
        );

        self.get_event(event.uuid)?
            .ok_or(EventServiceError::InconsistentState(
                "created event not found in read-back",
            ))
    }

    /// Applies a parent update with per-collection reconciliation.
    ///
    /// Each submitted collection mapping is resolved against the stored
    /// children and applied in full; the whole update commits atomically
    /// or returns the first error with storage untouched.
    pub fn update_event(
        &mut self,
        viewer: &Viewer,
        request: &EventUpdateRequest,
    ) -> Result<EventAggregate, EventServiceError> {
        let (mut event, dates, application_questions, admin_questions) = {
            let repo = SqliteEventRepository::try_new(self.conn)?;
            let event = repo
                .get_event(request.event_uuid)?
                .ok_or(EventServiceError::EventNotFound(request.event_uuid))?;
            let dates = repo.list_dates(event.uuid)?;
            let application_questions = repo.list_questions(event.uuid, false)?;
            let admin_questions = repo.list_questions(event.uuid, true)?;
            (event, dates, application_questions, admin_questions)
        };

        if !can_manage_event(self.conn, viewer, event.group_uuid)? {
            return Err(EventServiceError::NotPermitted {
                person_uuid: viewer.person_uuid,
                group_uuid: event.group_uuid,
            });
        }

        if let Some(name) = &request.name {
            event.name = name.clone();
        }
        if let Some(application_open) = request.application_open {
            event.application_open = application_open;
        }
        if let Some(attrs) = &request.contact_attrs {
            event.required_contact_attrs = attrs.required.clone();
            event.hidden_contact_attrs = attrs.hidden.clone();
        }

        let date_writes = match &request.dates {
            Some(records) => {
                let change_set = ChangeSet::from_keyed(records.clone());
                let outcome = reconcile(event.uuid, &dates, &change_set)?;
                ChildWrites::from(&outcome)
            }
            None => ChildWrites::default(),
        };

        let mut question_writes: ChildWrites<EventQuestion> = ChildWrites::default();
        if let Some(records) = &request.application_questions {
            let change_set = ChangeSet::from_keyed(records.clone());
            let outcome = reconcile(event.uuid, &application_questions, &change_set)?;
            merge_question_writes(&mut question_writes, ChildWrites::from(&outcome), false);
        }
        if let Some(records) = &request.admin_questions {
            let change_set = ChangeSet::from_keyed(records.clone());
            let outcome = reconcile(event.uuid, &admin_questions, &change_set)?;
            merge_question_writes(&mut question_writes, ChildWrites::from(&outcome), true);
        }

        let new_version = {
            let mut repo = SqliteEventRepository::try_new(self.conn)?;
            repo.apply_update(
                &event,
                request.expected_version,
                &date_writes,
                &question_writes,
            )?
        };

        debug!(
            "event=event_update module=service status=ok event_uuid={} version={new_version}",
            event.uuid
        );

        self.get_event(request.event_uuid)?
            .ok_or(EventServiceError::InconsistentState(
                "updated event not found in read-back",
            ))
    }

    /// Builds an unpersisted create request copying name, kind and
    /// questions from an existing event.
    ///
    /// Dates and registrations are not copied; every question gets a
    /// fresh identity when the request is created.
    pub fn duplicate_event(
        &mut self,
        source_uuid: EventId,
    ) -> Result<EventCreateRequest, EventServiceError> {
        let repo = SqliteEventRepository::try_new(self.conn)?;
        let source = repo
            .get_event(source_uuid)?
            .ok_or(EventServiceError::EventNotFound(source_uuid))?;
        let application_questions = repo.list_questions(source_uuid, false)?;
        let admin_questions = repo.list_questions(source_uuid, true)?;

        Ok(EventCreateRequest {
            group_uuid: source.group_uuid,
            name: source.name,
            kind: source.kind,
            contact_uuid: None,
            dates: Vec::new(),
            application_questions: application_questions
                .into_iter()
                .map(question_fields)
                .collect(),
            admin_questions: admin_questions.into_iter().map(question_fields).collect(),
        })
    }

    /// Lists events of a group, optionally restricted by year and kind.
    pub fn list_events(
        &mut self,
        group_uuid: GroupId,
        filter: EventListFilter,
        year: Option<i32>,
        kind: Option<EventKind>,
    ) -> Result<Vec<Event>, EventServiceError> {
        let group_uuids = match filter {
            EventListFilter::Subtree => {
                let group_repo = SqliteGroupRepository::try_new(self.conn)?;
                let ids = group_repo.subtree_ids(group_uuid)?;
                if ids.is_empty() {
                    return Err(EventServiceError::GroupNotFound(group_uuid));
                }
                ids
            }
            EventListFilter::GroupOnly => vec![group_uuid],
        };

        let repo = SqliteEventRepository::try_new(self.conn)?;
        let query = EventListQuery {
            group_uuids,
            year,
            kind,
        };
        repo.list_events(&query).map_err(Into::into)
    }

    /// Registers a person for an event.
    pub fn register(
        &mut self,
        event_uuid: EventId,
        person_uuid: PersonId,
    ) -> Result<Participation, EventServiceError> {
        {
            let repo = SqliteEventRepository::try_new(self.conn)?;
            repo.get_event(event_uuid)?
                .ok_or(EventServiceError::EventNotFound(event_uuid))?;
        }
        {
            let repo = SqlitePersonRepository::try_new(self.conn)?;
            repo.get_person(person_uuid, false)?
                .ok_or(EventServiceError::PersonNotFound(person_uuid))?;
        }

        let repo = SqliteParticipationRepository::try_new(self.conn)?;
        repo.create_participation(event_uuid, person_uuid)
            .map_err(|err| match err {
                RepoError::Duplicate(_) => EventServiceError::AlreadyRegistered {
                    event_uuid,
                    person_uuid,
                },
                other => other.into(),
            })
    }

    /// Removes a person's registration for an event.
    pub fn unregister(
        &mut self,
        event_uuid: EventId,
        person_uuid: PersonId,
    ) -> Result<(), EventServiceError> {
        let repo = SqliteParticipationRepository::try_new(self.conn)?;
        repo.delete_participation(event_uuid, person_uuid)?;
        Ok(())
    }

    /// Looks up one person's registration, `None` when not registered.
    pub fn participation_for(
        &mut self,
        event_uuid: EventId,
        person_uuid: PersonId,
    ) -> Result<Option<Participation>, EventServiceError> {
        let repo = SqliteParticipationRepository::try_new(self.conn)?;
        repo.get_participation(event_uuid, person_uuid)
            .map_err(Into::into)
    }

    /// Lists registrations of one event in registration order.
    pub fn list_participations(
        &mut self,
        event_uuid: EventId,
    ) -> Result<Vec<Participation>, EventServiceError> {
        let repo = SqliteParticipationRepository::try_new(self.conn)?;
        repo.list_participations(event_uuid).map_err(Into::into)
    }
}

fn merge_question_writes(
    target: &mut ChildWrites<EventQuestion>,
    mut source: ChildWrites<EventQuestion>,
    admin: bool,
) {
    for question in &mut source.inserts {
        question.admin = admin;
    }
    target.inserts.append(&mut source.inserts);
    target.updates.append(&mut source.updates);
    target.deletes.append(&mut source.deletes);
}

fn question_fields(question: EventQuestion) -> EventQuestionFields {
    EventQuestionFields {
        question: question.question,
        choices: question.choices,
    }
}
