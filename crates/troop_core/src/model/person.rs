//! Person domain model.
//!
//! # Responsibility
//! - Define the canonical member record shared by roster, search and
//!   registration use-cases.
//! - Provide lifecycle helpers for soft-delete semantics.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another person.
//! - `is_deleted` is the source of truth for tombstone state.
//! - `last_name` must not be blank for persisted people.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a person.
pub type PersonId = Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Canonical member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Stable global ID used for linking, access scoping and auditing.
    pub uuid: PersonId,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub town: Option<String>,
    /// Soft delete tombstone; archived members stay referencable.
    pub is_deleted: bool,
}

/// Validation failures for person records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersonValidationError {
    BlankLastName,
    InvalidEmail(String),
}

impl Display for PersonValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankLastName => write!(f, "last name must not be blank"),
            Self::InvalidEmail(value) => write!(f, "email is not a valid address: `{value}`"),
        }
    }
}

impl Error for PersonValidationError {}

impl Person {
    /// Creates a new person with a generated stable ID.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), first_name, last_name)
    }

    /// Creates a new person with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(
        uuid: PersonId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            uuid,
            first_name: first_name.into(),
            last_name: last_name.into(),
            nickname: None,
            email: None,
            town: None,
            is_deleted: false,
        }
    }

    /// Checks record-level constraints before persistence.
    pub fn validate(&self) -> Result<(), PersonValidationError> {
        if self.last_name.trim().is_empty() {
            return Err(PersonValidationError::BlankLastName);
        }
        if let Some(email) = self.email.as_deref() {
            if !EMAIL_RE.is_match(email.trim()) {
                return Err(PersonValidationError::InvalidEmail(email.to_string()));
            }
        }
        Ok(())
    }

    /// `last_name first_name` display form used by list orderings.
    pub fn list_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
            .trim()
            .to_string()
    }

    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    pub fn restore(&mut self) {
        self.is_deleted = false;
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::{Person, PersonValidationError};

    #[test]
    fn validate_rejects_blank_last_name() {
        let person = Person::new("Ann", "   ");
        assert_eq!(
            person.validate().unwrap_err(),
            PersonValidationError::BlankLastName
        );
    }

    #[test]
    fn validate_rejects_malformed_email() {
        let mut person = Person::new("Ann", "Archer");
        person.email = Some("not-an-address".to_string());
        assert!(matches!(
            person.validate().unwrap_err(),
            PersonValidationError::InvalidEmail(_)
        ));
    }

    #[test]
    fn validate_accepts_plain_address() {
        let mut person = Person::new("Ann", "Archer");
        person.email = Some("ann@example.com".to_string());
        assert!(person.validate().is_ok());
    }

    #[test]
    fn list_name_joins_last_and_first() {
        let person = Person::new("Ann", "Archer");
        assert_eq!(person.list_name(), "Archer Ann");
    }
}
