//! Group domain model.
//!
//! Groups form an adjacency-list hierarchy; a group with no parent is a
//! top-level layer. Deletion is a soft tombstone so historic role and
//! event references stay intact.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for a group.
pub type GroupId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uuid: GroupId,
    pub name: String,
    /// `None` marks a top-level group.
    pub parent_uuid: Option<GroupId>,
    pub is_deleted: bool,
}

/// Validation failures for group records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupValidationError {
    BlankName,
}

impl Display for GroupValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "group name must not be blank"),
        }
    }
}

impl Error for GroupValidationError {}

impl Group {
    /// Creates a new group with a generated stable ID.
    pub fn new(name: impl Into<String>, parent_uuid: Option<GroupId>) -> Self {
        Self::with_id(Uuid::new_v4(), name, parent_uuid)
    }

    /// Creates a new group with a caller-provided stable ID.
    pub fn with_id(
        uuid: GroupId,
        name: impl Into<String>,
        parent_uuid: Option<GroupId>,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            parent_uuid,
            is_deleted: false,
        }
    }

    pub fn validate(&self) -> Result<(), GroupValidationError> {
        if self.name.trim().is_empty() {
            return Err(GroupValidationError::BlankName);
        }
        Ok(())
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
