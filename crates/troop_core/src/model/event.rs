//! Event domain model with its reconciled child collections.
//!
//! # Responsibility
//! - Define event, event-date and event-question records.
//! - Provide field-level validation for parent and children.
//! - Wire the child records into the collection reconciler.
//!
//! # Invariants
//! - Every event belongs to exactly one group.
//! - `finish_on` is never before `start_on` on a valid date.
//! - `lock_version` only ever increases, by one per committed update.

use crate::model::group::GroupId;
use crate::model::person::PersonId;
use crate::model::FieldViolation;
use crate::reconcile::Reconcilable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Stable identifier for an event.
pub type EventId = Uuid;

/// Contact attribute names an event may require or hide on application
/// forms. Submitted sets are validated against this list.
pub const ASSIGNABLE_CONTACT_ATTRS: &[&str] =
    &["nickname", "email", "address", "town", "social_accounts"];

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Plain one-off event.
    Event,
    /// Course with application workflow.
    Course,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Course => "course",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(Self::Event),
            "course" => Some(Self::Course),
            _ => None,
        }
    }
}

/// Parent record owning the date and question collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: EventId,
    pub group_uuid: GroupId,
    pub name: String,
    pub kind: EventKind,
    pub contact_uuid: Option<PersonId>,
    pub application_open: bool,
    /// Contact attributes an applicant must fill in.
    pub required_contact_attrs: BTreeSet<String>,
    /// Contact attributes hidden from application forms.
    pub hidden_contact_attrs: BTreeSet<String>,
    /// Optimistic concurrency token checked on update.
    pub lock_version: i64,
}

impl Event {
    /// Creates a new event with a generated stable ID.
    pub fn new(group_uuid: GroupId, name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            group_uuid,
            name: name.into(),
            kind,
            contact_uuid: None,
            application_open: false,
            required_contact_attrs: BTreeSet::new(),
            hidden_contact_attrs: BTreeSet::new(),
            lock_version: 0,
        }
    }

    /// Checks parent-level constraints before persistence.
    pub fn validate(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push(FieldViolation::new("name", "must not be blank"));
        }
        for attr in &self.required_contact_attrs {
            if !ASSIGNABLE_CONTACT_ATTRS.contains(&attr.as_str()) {
                violations.push(FieldViolation::new(
                    "required_contact_attrs",
                    format!("unknown contact attribute `{attr}`"),
                ));
            }
        }
        for attr in &self.hidden_contact_attrs {
            if !ASSIGNABLE_CONTACT_ATTRS.contains(&attr.as_str()) {
                violations.push(FieldViolation::new(
                    "hidden_contact_attrs",
                    format!("unknown contact attribute `{attr}`"),
                ));
            }
            if self.required_contact_attrs.contains(attr) {
                violations.push(FieldViolation::new(
                    "hidden_contact_attrs",
                    format!("`{attr}` cannot be both required and hidden"),
                ));
            }
        }
        violations
    }
}

/// One date span of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDate {
    pub uuid: Uuid,
    pub event_uuid: EventId,
    pub label: String,
    pub start_on: NaiveDate,
    pub finish_on: Option<NaiveDate>,
}

/// Submitted field set for one event date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDateFields {
    pub label: String,
    pub start_on: NaiveDate,
    pub finish_on: Option<NaiveDate>,
}

impl Reconcilable for EventDate {
    type Fields = EventDateFields;

    fn id(&self) -> Uuid {
        self.uuid
    }

    fn new_scoped(parent: Uuid, fields: &EventDateFields) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            event_uuid: parent,
            label: fields.label.clone(),
            start_on: fields.start_on,
            finish_on: fields.finish_on,
        }
    }

    fn apply_fields(&mut self, fields: &EventDateFields) {
        self.label = fields.label.clone();
        self.start_on = fields.start_on;
        self.finish_on = fields.finish_on;
    }

    fn validate(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        if self.label.trim().is_empty() {
            violations.push(FieldViolation::new("label", "must not be blank"));
        }
        if let Some(finish_on) = self.finish_on {
            if finish_on < self.start_on {
                violations.push(FieldViolation::new(
                    "finish_on",
                    "must not be before start_on",
                ));
            }
        }
        violations
    }
}

/// One application or admin question of an event.
///
/// Application and admin questions share one record shape; the `admin`
/// flag is owned by the collection a question belongs to, not by the
/// submitted fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuestion {
    pub uuid: Uuid,
    pub event_uuid: EventId,
    pub question: String,
    /// Comma-separated list of answer choices; free text when `None`.
    pub choices: Option<String>,
    pub admin: bool,
}

/// Submitted field set for one event question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuestionFields {
    pub question: String,
    pub choices: Option<String>,
}

impl EventQuestion {
    /// Splits the stored `choices` column into trimmed options.
    pub fn choice_list(&self) -> Vec<String> {
        self.choices
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|choice| !choice.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Reconcilable for EventQuestion {
    type Fields = EventQuestionFields;

    fn id(&self) -> Uuid {
        self.uuid
    }

    fn new_scoped(parent: Uuid, fields: &EventQuestionFields) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            event_uuid: parent,
            question: fields.question.clone(),
            choices: fields.choices.clone(),
            // Admin membership is assigned by the collection the caller
            // reconciles against; see EventService::update_event.
            admin: false,
        }
    }

    fn apply_fields(&mut self, fields: &EventQuestionFields) {
        self.question = fields.question.clone();
        self.choices = fields.choices.clone();
    }

    fn validate(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        if self.question.trim().is_empty() {
            violations.push(FieldViolation::new("question", "must not be blank"));
        }
        violations
    }
}
