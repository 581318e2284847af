//! Core domain logic for troop membership management.
//! This crate is the single source of truth for business invariants.

pub mod access;
pub mod db;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod search;
pub mod service;

pub use access::{accessible_people_ids, can_manage_event, Role, Viewer};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::event::{
    Event, EventDate, EventDateFields, EventId, EventKind, EventQuestion, EventQuestionFields,
};
pub use model::group::{Group, GroupId};
pub use model::participation::Participation;
pub use model::person::{Person, PersonId};
pub use model::FieldViolation;
pub use reconcile::{
    reconcile, ChangeEntry, ChangeSet, FieldError, Reconcilable, ReconcileError,
    ReconcileOutcome, SubmittedRecord,
};
pub use repo::event_repo::{EventListQuery, EventRepository, SqliteEventRepository};
pub use repo::group_repo::{GroupRepository, SqliteGroupRepository};
pub use repo::participation_repo::{ParticipationRepository, SqliteParticipationRepository};
pub use repo::person_repo::{PersonListQuery, PersonRepository, SqlitePersonRepository};
pub use repo::{RepoError, RepoResult};
pub use search::fts::{
    quicksearch, search_groups, search_people, GroupHit, PersonHit, Quicksearch, SearchError,
    SearchQuery, SearchResult,
};
pub use service::event_service::{
    ContactAttrSets, EventAggregate, EventCreateRequest, EventListFilter, EventService,
    EventServiceError, EventUpdateRequest,
};
pub use service::group_service::{GroupService, GroupServiceError};
pub use service::person_service::PersonService;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
